// src/memory_store.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! In-process backend implementing the whole adapter contract.
//!
//! Useful for tests and as a reference for adapter authors. Capabilities can
//! be narrowed with [`MemoryBackend::with_capabilities`] to emulate simpler
//! backends.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::backend::{
    BackendResult, ObjectEntry, ObjectListing, ObjectStat, PartListing, PresignRequest, PutOptions,
    StorageBackend,
};
use crate::capability::{Capability, CapabilityDescriptor};
use crate::config::BackendSettings;
use crate::descriptor::{HashInfo, PartDescriptor, new_object_id};
use crate::error::BackendError;
use crate::listing::match_listing;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    opts: PutOptions,
    e_tag: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn new(data: Bytes, opts: PutOptions) -> Self {
        Self {
            e_tag: HashInfo::crc32_of(&data).crc32,
            data,
            opts,
            last_modified: Utc::now(),
        }
    }

    fn stat(&self) -> ObjectStat {
        ObjectStat {
            size: self.data.len() as u64,
            e_tag: Some(self.e_tag.clone()),
            content_type: self.opts.content_type.clone(),
            last_modified: Some(self.last_modified),
            metadata: self.opts.metadata.clone(),
            user_metadata: self.opts.user_metadata.clone(),
        }
    }
}

#[derive(Debug)]
struct StoredPart {
    data: Bytes,
    e_tag: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    key: String,
    opts: PutOptions,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    sessions: HashMap<String, Session>,
}

#[derive(Debug)]
pub struct MemoryBackend {
    settings: BackendSettings,
    capabilities: CapabilityDescriptor,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(settings: BackendSettings) -> Self {
        let mut capabilities = CapabilityDescriptor::full();
        capabilities.max_parts = crate::constants::MAX_MULTIPART_PARTS;
        Self {
            settings,
            capabilities,
            state: Mutex::new(State::default()),
        }
    }

    pub fn named(name: &str) -> Self {
        Self::new(BackendSettings::new(name))
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityDescriptor) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Number of sessions neither completed nor aborted.
    pub async fn open_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Stored ACL of `key`, as the backend spells it.
    pub async fn acl_of(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .objects
            .get(key)
            .and_then(|o| o.opts.acl.clone())
    }

    fn require(&self, capability: Capability) -> BackendResult<()> {
        if self.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(BackendError::Unsupported(capability))
        }
    }
}

fn no_such_session(upload_id: &str) -> BackendError {
    BackendError::NoSuchSession(upload_id.to_string())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn put_object(&self, key: &str, data: Bytes, opts: &PutOptions) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.objects.insert(key.to_string(), StoredObject::new(data, opts.clone()));
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        let state = self.state.lock().await;
        state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        self.state.lock().await.objects.remove(key);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> BackendResult<Option<ObjectStat>> {
        Ok(self.state.lock().await.objects.get(key).map(StoredObject::stat))
    }

    async fn copy_object(&self, src: &str, dst: &str, opts: &PutOptions) -> BackendResult<()> {
        self.require(Capability::SameCopy)?;
        let mut state = self.state.lock().await;
        let source = state
            .objects
            .get(src)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(src.to_string()))?;
        let mut copy_opts = source.opts.clone();
        if opts.acl.is_some() {
            copy_opts.acl = opts.acl.clone();
        }
        state
            .objects
            .insert(dst.to_string(), StoredObject::new(source.data, copy_opts));
        Ok(())
    }

    async fn rename_object(&self, src: &str, dst: &str) -> BackendResult<()> {
        self.require(Capability::SameMove)?;
        let mut state = self.state.lock().await;
        let object = state
            .objects
            .remove(src)
            .ok_or_else(|| BackendError::NotFound(src.to_string()))?;
        state.objects.insert(dst.to_string(), object);
        Ok(())
    }

    async fn create_multipart(&self, key: &str, opts: &PutOptions) -> BackendResult<String> {
        self.require(Capability::MultipartUpload)?;
        let upload_id = new_object_id();
        self.state.lock().await.sessions.insert(
            upload_id.clone(),
            Session {
                key: key.to_string(),
                opts: opts.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BackendResult<String> {
        self.require(Capability::MultipartUpload)?;
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(upload_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| no_such_session(upload_id))?;
        let e_tag = HashInfo::crc32_of(&data).crc32;
        session.parts.insert(
            part_number,
            StoredPart {
                data,
                e_tag: e_tag.clone(),
                created_at: Utc::now(),
            },
        );
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
        self.require(Capability::PartCopy)?;
        let chunk = {
            let state = self.state.lock().await;
            let source = state
                .objects
                .get(src)
                .ok_or_else(|| BackendError::NotFound(src.to_string()))?;
            let len = source.data.len() as u64;
            if range.start > range.end || range.end > len {
                return Err(BackendError::Other(anyhow!(
                    "range {}..{} outside object `{src}` of {len} bytes",
                    range.start,
                    range.end
                )));
            }
            source.data.slice(range.start as usize..range.end as usize)
        };
        self.upload_part(dst, upload_id, part_number, chunk).await
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartDescriptor],
    ) -> BackendResult<()> {
        self.require(Capability::MultipartUpload)?;
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get(upload_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| no_such_session(upload_id))?;

        let mut merged = BytesMut::new();
        for part in parts {
            let stored = session.parts.get(&part.part_number).ok_or_else(|| {
                BackendError::Other(anyhow!("part {} was never uploaded", part.part_number))
            })?;
            if stored.e_tag != part.e_tag {
                return Err(BackendError::Other(anyhow!(
                    "ETag mismatch for part {}",
                    part.part_number
                )));
            }
            merged.extend_from_slice(&stored.data);
        }

        let opts = session.opts.clone();
        state.sessions.remove(upload_id);
        state
            .objects
            .insert(key.to_string(), StoredObject::new(merged.freeze(), opts));
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> BackendResult<()> {
        self.require(Capability::MultipartUpload)?;
        match self.state.lock().await.sessions.remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(no_such_session(upload_id)),
        }
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: Option<u32>,
    ) -> BackendResult<PartListing> {
        self.require(Capability::ListParts)?;
        let state = self.state.lock().await;
        let session = state
            .sessions
            .get(upload_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| no_such_session(upload_id))?;

        let after = part_number_marker.unwrap_or(0);
        let limit = if max_parts == 0 { usize::MAX } else { max_parts as usize };
        let mut remaining = session.parts.range(after.saturating_add(1)..);
        let parts: Vec<PartDescriptor> = remaining
            .by_ref()
            .take(limit)
            .map(|(&n, p)| {
                let mut part = PartDescriptor::new(n, p.e_tag.clone(), p.data.len() as u64);
                part.upload_session_id = Some(upload_id.to_string());
                part.created_at = p.created_at;
                part
            })
            .collect();
        let is_truncated = remaining.next().is_some();
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
        self.require(Capability::Listing)?;
        let state = self.state.lock().await;

        let mut dirs: Vec<String> = Vec::new();
        let mut files: Vec<ObjectEntry> = Vec::new();
        for (key, object) in state.objects.range(dir.to_string()..) {
            let Some(rest) = key.strip_prefix(dir) else {
                break;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((sub, _)) => {
                    if dirs.last().map(String::as_str) != Some(sub) {
                        dirs.push(sub.to_string());
                    }
                }
                None => files.push(ObjectEntry {
                    name: rest.to_string(),
                    stat: object.stat(),
                }),
            }
        }
        dirs.dedup();

        let dirs = match_listing(dirs, |d| d.as_str(), prefix, marker, 0).items;
        let page = match_listing(files, |f| f.name.as_str(), prefix, marker, max_files);
        Ok(ObjectListing {
            dirs,
            files: page.items,
            is_truncated: page.is_truncated,
            next_marker: page.next_marker,
        })
    }

    async fn presigned_url(&self, key: &str, request: &PresignRequest) -> BackendResult<String> {
        self.require(Capability::PresignedUrl)?;
        let expires = Utc::now().timestamp() + request.expires_in.as_secs() as i64;
        let mut url = format!(
            "memory://{}/{key}?method={}&expires={expires}",
            self.settings.name,
            request.method.as_str()
        );
        if !request.headers.is_empty() {
            let signed: Vec<&str> = request.headers.keys().map(String::as_str).collect();
            url.push_str(&format!("&signed-headers={}", signed.join(";")));
        }
        for (name, value) in &request.response_headers {
            url.push_str(&format!("&response-{name}={value}"));
        }
        Ok(url)
    }

    async fn set_object_acl(&self, key: &str, acl: &str) -> BackendResult<()> {
        self.require(Capability::Acl)?;
        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;
        object.opts.acl = Some(acl.to_string());
        Ok(())
    }
}
