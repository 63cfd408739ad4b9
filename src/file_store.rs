// src/file_store.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// FileSystemBackend: the adapter contract on top of a local directory tree.
//
// Keys map to paths under `root`. Writes go to a temp file next to the target
// and are renamed into place, so readers never see a partial object.
// Multipart sessions are staged under `<root>/.multipart/<upload_id>/` and
// survive a process restart.

use std::io::{ErrorKind, SeekFrom};
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::backend::{BackendResult, ObjectEntry, ObjectListing, ObjectStat, PartListing, PutOptions, StorageBackend};
use crate::capability::CapabilityDescriptor;
use crate::config::BackendSettings;
use crate::constants::{FILE_MULTIPART_STAGING_DIR, MAX_MULTIPART_PARTS};
use crate::descriptor::{HashInfo, PartDescriptor, new_object_id};
use crate::error::BackendError;
use crate::listing::match_listing;

const TEMP_PREFIX: &str = ".transferkit-";
const SESSION_KEY_FILE: &str = "key";
const PART_PREFIX: &str = "part-";

#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
    settings: BackendSettings,
    capabilities: CapabilityDescriptor,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>, settings: BackendSettings) -> Self {
        let capabilities = CapabilityDescriptor {
            same_copy: true,
            same_move: true,
            multipart_upload: true,
            list_parts: true,
            part_copy: true,
            listing: true,
            max_parts: MAX_MULTIPART_PARTS,
            ..CapabilityDescriptor::minimal()
        };
        Self {
            root: root.into(),
            settings,
            capabilities,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path under the root. Keys that climb out of the
    /// root or point into the staging area are rejected.
    fn resolve(&self, key: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let mut path = self.root.clone();
        for (i, component) in relative.components().enumerate() {
            match component {
                Component::Normal(part) => {
                    if i == 0 && part == FILE_MULTIPART_STAGING_DIR {
                        return Err(invalid_key(key));
                    }
                    path.push(part);
                }
                Component::CurDir => {}
                _ => return Err(invalid_key(key)),
            }
        }
        if path == self.root {
            return Err(invalid_key(key));
        }
        Ok(path)
    }

    fn session_dir(&self, upload_id: &str) -> BackendResult<PathBuf> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BackendError::NoSuchSession(upload_id.to_string()));
        }
        Ok(self.root.join(FILE_MULTIPART_STAGING_DIR).join(upload_id))
    }

    /// The staging directory of `upload_id`, after checking it belongs to `key`.
    async fn open_session(&self, key: &str, upload_id: &str) -> BackendResult<PathBuf> {
        let dir = self.session_dir(upload_id)?;
        match fs::read_to_string(dir.join(SESSION_KEY_FILE)).await {
            Ok(stored) if stored == key => Ok(dir),
            Ok(_) => Err(BackendError::NoSuchSession(upload_id.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::NoSuchSession(upload_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn session_parts(&self, dir: &Path) -> BackendResult<Vec<(u32, PathBuf)>> {
        let mut parts = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PART_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            parts.push((number, entry.path()));
        }
        parts.sort_by_key(|(n, _)| *n);
        Ok(parts)
    }
}

fn invalid_key(key: &str) -> BackendError {
    BackendError::Other(anyhow!("invalid key `{key}`"))
}

fn part_file(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(format!("{PART_PREFIX}{part_number:05}"))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{TEMP_PREFIX}{name}.{}.tmp", new_object_id()))
}

fn not_found_as(key: &str) -> impl Fn(std::io::Error) -> BackendError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            BackendError::NotFound(key.to_string())
        } else {
            BackendError::Io(e)
        }
    }
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Write `data` to a temp file beside `path` and rename it into place.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    ensure_parent(path).await?;
    let tmp = temp_path_for(path);
    let outcome = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;
    if outcome.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    outcome
}

fn stat_from(metadata: &std::fs::Metadata) -> ObjectStat {
    let modified = metadata.modified().ok();
    let e_tag = modified.map(|m| {
        let secs = m
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("file-{}-{secs}", metadata.len())
    });
    ObjectStat {
        size: metadata.len(),
        e_tag,
        last_modified: modified.map(DateTime::<Utc>::from),
        ..ObjectStat::default()
    }
}

#[async_trait]
impl StorageBackend for FileSystemBackend {
    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn put_object(&self, key: &str, data: Bytes, _opts: &PutOptions) -> BackendResult<()> {
        let path = self.resolve(key)?;
        trace!(path = %path.display(), len = data.len(), "writing file");
        write_atomic(&path, &data).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        let path = self.resolve(key)?;
        let data = fs::read(&path).await.map_err(not_found_as(key))?;
        Ok(Bytes::from(data))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn head_object(&self, key: &str) -> BackendResult<Option<ObjectStat>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(stat_from(&metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(&self, src: &str, dst: &str, _opts: &PutOptions) -> BackendResult<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        ensure_parent(&to).await?;
        let tmp = temp_path_for(&to);
        if let Err(e) = fs::copy(&from, &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(not_found_as(src)(e));
        }
        if let Err(e) = fs::rename(&tmp, &to).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(from = %from.display(), to = %to.display(), "file copied");
        Ok(())
    }

    async fn rename_object(&self, src: &str, dst: &str) -> BackendResult<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        ensure_parent(&to).await?;
        fs::rename(&from, &to).await.map_err(not_found_as(src))?;
        debug!(from = %from.display(), to = %to.display(), "file renamed");
        Ok(())
    }

    async fn create_multipart(&self, key: &str, _opts: &PutOptions) -> BackendResult<String> {
        self.resolve(key)?;
        let upload_id = new_object_id();
        let dir = self.session_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;
        write_atomic(&dir.join(SESSION_KEY_FILE), key.as_bytes()).await?;
        debug!(key, upload_id = %upload_id, dir = %dir.display(), "staging directory created");
        Ok(upload_id)
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> BackendResult<String> {
        let dir = self.open_session(key, upload_id).await?;
        let e_tag = HashInfo::crc32_of(&data).crc32;
        write_atomic(&part_file(&dir, part_number), &data).await?;
        trace!(key, upload_id, part_number, len = data.len(), "part staged");
        Ok(e_tag)
    }

    async fn upload_part_copy(
        &self,
        src: &str,
        dst: &str,
        upload_id: &str,
        part_number: u32,
        range: Range<u64>,
    ) -> BackendResult<String> {
        let from = self.resolve(src)?;
        let mut file = fs::File::open(&from).await.map_err(not_found_as(src))?;
        let len = file.metadata().await?.len();
        if range.start > range.end || range.end > len {
            return Err(BackendError::Other(anyhow!(
                "range {}..{} outside `{src}` of {len} bytes",
                range.start,
                range.end
            )));
        }
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        self.upload_part(dst, upload_id, part_number, Bytes::from(buf)).await
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[PartDescriptor]) -> BackendResult<()> {
        let dir = self.open_session(key, upload_id).await?;
        let target = self.resolve(key)?;
        ensure_parent(&target).await?;
        let tmp = temp_path_for(&target);

        let outcome: BackendResult<()> = async {
            let mut out = fs::File::create(&tmp).await?;
            for part in parts {
                let data = match fs::read(part_file(&dir, part.part_number)).await {
                    Ok(data) => data,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(BackendError::Other(anyhow!("part {} was never uploaded", part.part_number)));
                    }
                    Err(e) => return Err(e.into()),
                };
                if HashInfo::crc32_of(&data).crc32 != part.e_tag {
                    return Err(BackendError::Other(anyhow!("ETag mismatch for part {}", part.part_number)));
                }
                out.write_all(&data).await?;
            }
            out.sync_all().await?;
            fs::rename(&tmp, &target).await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::remove_dir_all(&dir).await?;
        debug!(key, upload_id, parts = parts.len(), "staged parts merged");
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> BackendResult<()> {
        let dir = self.open_session(key, upload_id).await?;
        fs::remove_dir_all(&dir).await?;
        debug!(key, upload_id, "staging directory removed");
        Ok(())
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: Option<u32>,
    ) -> BackendResult<PartListing> {
        let dir = self.open_session(key, upload_id).await?;
        let after = part_number_marker.unwrap_or(0);
        let limit = if max_parts == 0 { usize::MAX } else { max_parts as usize };

        let candidates: Vec<(u32, PathBuf)> = self
            .session_parts(&dir)
            .await?
            .into_iter()
            .filter(|(n, _)| *n > after)
            .collect();
        let is_truncated = candidates.len() > limit;

        let mut parts = Vec::new();
        for (number, path) in candidates.into_iter().take(limit) {
            let data = fs::read(&path).await?;
            let mut part = PartDescriptor::new(number, HashInfo::crc32_of(&data).crc32, data.len() as u64);
            part.upload_session_id = Some(upload_id.to_string());
            parts.push(part);
        }
        let next_part_number_marker = if is_truncated {
            parts.last().map(|p| p.part_number)
        } else {
            None
        };
        Ok(PartListing {
            parts,
            is_truncated,
            next_part_number_marker,
            max_parts,
        })
    }

    async fn list_objects(
        &self,
        dir: &str,
        prefix: &str,
        marker: Option<&str>,
        max_files: usize,
    ) -> BackendResult<ObjectListing> {
        let at_root = dir.trim_matches('/').is_empty();
        let path = if at_root { self.root.clone() } else { self.resolve(dir)? };

        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ObjectListing::default()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) || (at_root && name == FILE_MULTIPART_STAGING_DIR) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                dirs.push(name);
            } else if metadata.is_file() {
                files.push(ObjectEntry {
                    stat: stat_from(&metadata),
                    name,
                });
            }
        }

        let dirs = match_listing(dirs, |d| d.as_str(), prefix, marker, 0).items;
        let page = match_listing(files, |f| f.name.as_str(), prefix, marker, max_files);
        trace!(dir = %path.display(), dirs = dirs.len(), files = page.items.len(), "directory listed");
        Ok(ObjectListing {
            dirs,
            files: page.items,
            is_truncated: page.is_truncated,
            next_marker: page.next_marker,
        })
    }
}
