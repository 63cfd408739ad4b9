// src/service.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Orchestrator facade: picks the backend for a request, negotiates
// capabilities, runs the transfer strategy and hands the finished descriptor
// to the recorder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::acl::Acl;
use crate::backend::{PartListing, PresignRequest, PutOptions, StorageBackend};
use crate::capability::{Capability, CapabilityDescriptor};
use crate::config::TransferConfig;
use crate::constants::DEFAULT_MAX_LIST_PARTS;
use crate::copy::{CopyMode, CopyRequest, MoveRequest, SameBackendCopier};
use crate::descriptor::{HashInfo, PartDescriptor, TransferDescriptor, UploadStatus, extension_of};
use crate::error::{BackendError, Result, TransferError};
use crate::hash::{ContentHasher, HashAlgorithm};
use crate::listing::{ListFilesRequest, ListFilesResult, RemoteDirInfo, RemoteFileInfo};
use crate::multipart::{MultipartSession, TransferMode, choose_mode};
use crate::pretreatment::{
    InitiateMultipartRequest, TransferSource, UploadRequest, attach_side_artifact, build_descriptor,
    normalize_dir,
};
use crate::progress::{ProgressObserver, ProgressReporter};
use crate::recorder::{NoopRecorder, Recorder};
use crate::rollback::Cleanup;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Builder for [`TransferService`].
pub struct TransferServiceBuilder {
    config: TransferConfig,
    backends: Vec<Arc<dyn StorageBackend>>,
    recorder: Option<Arc<dyn Recorder>>,
}

impl TransferServiceBuilder {
    /// Register a backend under its `settings().name`.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> Result<TransferService> {
        self.config
            .validate()
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;

        let mut backends: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        for backend in self.backends {
            let name = backend.name().to_string();
            if name.is_empty() {
                return Err(TransferError::InvalidRequest("backend name must not be empty".into()));
            }
            // records are keyed by url
            if let Some(clash) = backends
                .values()
                .find(|b| b.name() != name && b.settings().overlaps(backend.settings()))
            {
                return Err(TransferError::InvalidRequest(format!(
                    "backends `{}` and `{name}` share the url prefix `{}`",
                    clash.name(),
                    backend.settings().url_domain()
                )));
            }
            if backends.insert(name.clone(), backend).is_some() {
                return Err(TransferError::InvalidRequest(format!(
                    "backend `{name}` registered twice"
                )));
            }
        }

        Ok(TransferService {
            config: self.config,
            backends,
            recorder: self.recorder.unwrap_or_else(|| Arc::new(NoopRecorder)),
        })
    }
}

/// One uniform call surface over every registered backend.
pub struct TransferService {
    config: TransferConfig,
    backends: HashMap<String, Arc<dyn StorageBackend>>,
    recorder: Arc<dyn Recorder>,
}

impl TransferService {
    pub fn builder(config: TransferConfig) -> TransferServiceBuilder {
        TransferServiceBuilder {
            config,
            backends: Vec::new(),
            recorder: None,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    pub fn default_backend(&self) -> &str {
        &self.config.default_backend
    }

    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The backend registered as `name`, or the default backend for `None`.
    pub fn backend(&self, name: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
        let name = name.unwrap_or(&self.config.default_backend);
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| TransferError::BackendNotFound(name.to_string()))
    }

    pub fn capabilities(&self, name: Option<&str>) -> Result<CapabilityDescriptor> {
        Ok(self.backend(name)?.capabilities().clone())
    }

    pub fn supports(&self, name: Option<&str>, capability: Capability) -> Result<bool> {
        Ok(self.backend(name)?.capabilities().supports(capability))
    }

    // ------------------------------------------------------------------
    // save
    // ------------------------------------------------------------------

    /// Store the request's bytes (and side artifact) and record the result.
    pub async fn upload(&self, request: UploadRequest) -> Result<TransferDescriptor> {
        let UploadRequest {
            spec,
            source,
            size,
            side_artifact,
            hashes,
            observer,
        } = request;
        let backend = self.backend(spec.backend.as_deref())?;
        let backend = backend.as_ref();
        let strict = spec.strict.unwrap_or(self.config.strict_capabilities);

        let (reader, size) = open_source(backend.name(), source, size).await?;

        let mut desc = build_descriptor(&spec, backend, size);
        if let Some(side) = &side_artifact {
            attach_side_artifact(&mut desc, side, &self.config);
        }
        desc.assign_urls(&backend.settings().url_domain());
        let (opts, side_opts) = negotiate(backend, &mut desc, strict)?;

        let caps = backend.capabilities();
        let settings = backend.settings();
        let threshold = settings.multipart_threshold.unwrap_or(self.config.multipart_threshold);
        let part_size = settings
            .part_size
            .unwrap_or(self.config.part_size)
            .max(caps.min_part_size)
            .max(1);
        let mode = choose_mode(size, threshold, caps);
        let key = desc.key();
        info!(backend = backend.name(), key = %key, ?size, ?mode, "upload starting");

        let mut reporter = ProgressReporter::new(observer, size);
        let (total, hash) = match mode {
            TransferMode::SingleShot => put_single(backend, &key, reader, &opts, &hashes, &mut reporter).await?,
            TransferMode::Chunked => {
                put_chunked(backend, &key, reader, part_size, &opts, &hashes, &mut reporter, &mut desc).await?
            }
        };
        if let Some(declared) = size {
            if declared != total {
                warn!(backend = backend.name(), key = %key, declared, total, "declared size differs from bytes sent");
            }
        }
        desc.size = Some(total);
        desc.hash = Some(hash);
        reporter.set_total(total);
        reporter.finish();

        let mut cleanup = Cleanup::new(backend);
        cleanup.delete(key.clone());
        if let (Some(side), Some(side_key)) = (side_artifact, desc.side_artifact_key()) {
            cleanup.delete(side_key.clone());
            if let Err(e) = backend.put_object(&side_key, side.data, &side_opts).await {
                cleanup.run().await;
                return Err(TransferError::from_backend(backend.name(), &side_key, e));
            }
            debug!(backend = backend.name(), key = %side_key, "side artifact stored");
        }

        self.record(&desc, cleanup).await?;
        info!(backend = backend.name(), key = %key, size = total, url = %desc.url, "upload complete");
        Ok(desc)
    }

    // ------------------------------------------------------------------
    // delete / exists / download
    // ------------------------------------------------------------------

    /// Remove the object and its side artifact. Missing objects are not an error.
    pub async fn delete(&self, desc: &TransferDescriptor) -> Result<bool> {
        let backend = self.backend(Some(&desc.backend))?;
        if let Some(side_key) = desc.side_artifact_key() {
            backend
                .delete_object(&side_key)
                .await
                .map_err(|e| TransferError::from_backend(backend.name(), &side_key, e))?;
        }
        let key = desc.key();
        backend
            .delete_object(&key)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))?;
        self.recorder.delete(&desc.url).await.map_err(TransferError::Recorder)?;
        info!(backend = backend.name(), key = %key, "deleted");
        Ok(true)
    }

    /// Delete whatever the recorder knows under `url`. Unknown URLs return `false`.
    pub async fn delete_by_url(&self, url: &str) -> Result<bool> {
        match self.lookup(url).await? {
            Some(desc) => self.delete(&desc).await,
            None => Ok(false),
        }
    }

    pub async fn exists(&self, desc: &TransferDescriptor) -> Result<bool> {
        let backend = self.backend(Some(&desc.backend))?;
        let key = desc.key();
        backend
            .exists(&key)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))
    }

    pub async fn exists_by_url(&self, url: &str) -> Result<bool> {
        match self.lookup(url).await? {
            Some(desc) => self.exists(&desc).await,
            None => Ok(false),
        }
    }

    pub async fn download(&self, desc: &TransferDescriptor) -> Result<Bytes> {
        let backend = self.backend(Some(&desc.backend))?;
        let key = desc.key();
        backend
            .get_object(&key)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))
    }

    pub async fn download_by_url(&self, url: &str) -> Result<Bytes> {
        match self.lookup(url).await? {
            Some(desc) => self.download(&desc).await,
            None => Err(TransferError::NotFound {
                backend: self.config.default_backend.clone(),
                key: url.to_string(),
            }),
        }
    }

    /// Write the object into `writer`.
    pub async fn download_to<W>(&self, desc: &TransferDescriptor, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let data = self.download(desc).await?;
        let io_err = |e| TransferError::from_backend(&desc.backend, &desc.key(), BackendError::Io(e));
        writer.write_all(&data).await.map_err(io_err)?;
        writer.flush().await.map_err(io_err)?;
        Ok(data.len() as u64)
    }

    pub async fn download_side_artifact(&self, desc: &TransferDescriptor) -> Result<Bytes> {
        let side_key = desc
            .side_artifact_key()
            .ok_or_else(|| TransferError::InvalidRequest(format!("`{}` has no side artifact", desc.url)))?;
        let backend = self.backend(Some(&desc.backend))?;
        backend
            .get_object(&side_key)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &side_key, e))
    }

    // ------------------------------------------------------------------
    // optional capabilities
    // ------------------------------------------------------------------

    /// Presigned GET URL, or `None` when the backend cannot produce one.
    pub async fn generate_presigned_url(&self, desc: &TransferDescriptor, expires_in: Duration) -> Result<Option<String>> {
        self.presign(desc, desc.key(), &PresignRequest::get(expires_in)).await
    }

    /// Presigned URL for any method, e.g. a PUT a client uploads through directly.
    pub async fn generate_presigned_url_with(
        &self,
        desc: &TransferDescriptor,
        request: &PresignRequest,
    ) -> Result<Option<String>> {
        self.presign(desc, desc.key(), request).await
    }

    pub async fn generate_side_artifact_presigned_url(
        &self,
        desc: &TransferDescriptor,
        expires_in: Duration,
    ) -> Result<Option<String>> {
        self.generate_side_artifact_presigned_url_with(desc, &PresignRequest::get(expires_in))
            .await
    }

    pub async fn generate_side_artifact_presigned_url_with(
        &self,
        desc: &TransferDescriptor,
        request: &PresignRequest,
    ) -> Result<Option<String>> {
        match desc.side_artifact_key() {
            Some(side_key) => self.presign(desc, side_key, request).await,
            None => Ok(None),
        }
    }

    async fn presign(&self, desc: &TransferDescriptor, key: String, request: &PresignRequest) -> Result<Option<String>> {
        let backend = self.backend(Some(&desc.backend))?;
        if !backend.capabilities().supports(Capability::PresignedUrl) {
            return self.unsupported(backend.name(), Capability::PresignedUrl, None);
        }
        if request.expires_in.is_zero() {
            return Err(TransferError::InvalidRequest("presigned url expiry must be positive".into()));
        }
        debug!(backend = backend.name(), key = %key, method = request.method.as_str(), "presigning");
        backend
            .presigned_url(&key, request)
            .await
            .map(Some)
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))
    }

    /// Apply `acl` to the stored object and record the change. `false` when the
    /// backend has no ACL support and strict mode is off.
    pub async fn set_acl(&self, desc: &mut TransferDescriptor, acl: impl Into<Acl>) -> Result<bool> {
        let acl = acl.into();
        let key = desc.key();
        if !self.apply_acl(desc, &key, &acl).await? {
            return Ok(false);
        }
        desc.acl = Some(acl);
        self.recorder.update(desc).await.map_err(TransferError::Recorder)?;
        Ok(true)
    }

    pub async fn set_side_artifact_acl(&self, desc: &mut TransferDescriptor, acl: impl Into<Acl>) -> Result<bool> {
        let acl = acl.into();
        let Some(side_key) = desc.side_artifact_key() else {
            return Ok(false);
        };
        if !self.apply_acl(desc, &side_key, &acl).await? {
            return Ok(false);
        }
        desc.side_artifact_acl = Some(acl);
        self.recorder.update(desc).await.map_err(TransferError::Recorder)?;
        Ok(true)
    }

    async fn apply_acl(&self, desc: &TransferDescriptor, key: &str, acl: &Acl) -> Result<bool> {
        let backend = self.backend(Some(&desc.backend))?;
        if !backend.capabilities().supports(Capability::Acl) {
            return self.unsupported(backend.name(), Capability::Acl, false);
        }
        let native = translate(backend.as_ref(), acl)?;
        backend
            .set_object_acl(key, &native)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), key, e))?;
        Ok(true)
    }

    /// List one directory level. `None` when the backend cannot list.
    pub async fn list_files(&self, request: ListFilesRequest) -> Result<Option<ListFilesResult>> {
        let backend = self.backend(request.backend.as_deref())?;
        let caps = backend.capabilities();
        if !caps.supports(Capability::Listing) {
            return self.unsupported(backend.name(), Capability::Listing, None);
        }

        let mut max_files = request.max_files.unwrap_or(self.config.max_list_files);
        if caps.max_list_entries > 0 {
            max_files = max_files.min(caps.max_list_entries);
        }
        let settings = backend.settings();
        let path = normalize_dir(&request.path);
        let dir = format!("{}{}", settings.base_path, path);
        let listing = backend
            .list_objects(&dir, &request.filename_prefix, request.marker.as_deref(), max_files)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &dir, e))?;

        let dirs = listing
            .dirs
            .into_iter()
            .map(|name| RemoteDirInfo {
                backend: backend.name().to_string(),
                base_path: settings.base_path.clone(),
                path: path.clone(),
                name,
            })
            .collect();
        let files = listing
            .files
            .into_iter()
            .map(|entry| RemoteFileInfo {
                backend: backend.name().to_string(),
                base_path: settings.base_path.clone(),
                path: path.clone(),
                url: format!("{}{dir}{}", settings.url_domain(), entry.name),
                ext: extension_of(&entry.name),
                size: entry.stat.size,
                e_tag: entry.stat.e_tag,
                content_type: entry.stat.content_type,
                last_modified: entry.stat.last_modified,
                metadata: entry.stat.metadata,
                user_metadata: entry.stat.user_metadata,
                filename: entry.name,
            })
            .collect();

        Ok(Some(ListFilesResult {
            dirs,
            files,
            backend: backend.name().to_string(),
            base_path: settings.base_path.clone(),
            path,
            filename_prefix: request.filename_prefix,
            marker: request.marker,
            max_files,
            is_truncated: listing.is_truncated,
            next_marker: listing.next_marker,
        }))
    }

    /// Stat a single file; `Ok(None)` when it does not exist.
    pub async fn get_file_metadata(
        &self,
        backend: Option<&str>,
        path: &str,
        filename: &str,
    ) -> Result<Option<RemoteFileInfo>> {
        let backend = self.backend(backend)?;
        let settings = backend.settings();
        let path = normalize_dir(path);
        let key = format!("{}{path}{filename}", settings.base_path);
        let stat = backend
            .head_object(&key)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))?;
        Ok(stat.map(|stat| RemoteFileInfo {
            backend: backend.name().to_string(),
            base_path: settings.base_path.clone(),
            path,
            filename: filename.to_string(),
            url: format!("{}{key}", settings.url_domain()),
            ext: extension_of(filename),
            size: stat.size,
            e_tag: stat.e_tag,
            content_type: stat.content_type,
            last_modified: stat.last_modified,
            metadata: stat.metadata,
            user_metadata: stat.user_metadata,
        }))
    }

    // ------------------------------------------------------------------
    // caller-driven multipart
    // ------------------------------------------------------------------

    /// Open a session. The returned descriptor carries `upload_session_id`
    /// and is all later calls need, even from another process.
    pub async fn initiate_multipart(&self, request: InitiateMultipartRequest) -> Result<TransferDescriptor> {
        let InitiateMultipartRequest { spec, size } = request;
        let backend = self.backend(spec.backend.as_deref())?;
        let backend = backend.as_ref();
        if !backend.capabilities().supports(Capability::MultipartUpload) {
            return Err(TransferError::unsupported(backend.name(), Capability::MultipartUpload));
        }
        let strict = spec.strict.unwrap_or(self.config.strict_capabilities);

        let mut desc = build_descriptor(&spec, backend, size);
        desc.assign_urls(&backend.settings().url_domain());
        let (opts, _) = negotiate(backend, &mut desc, strict)?;

        let mut session = MultipartSession::new(backend, &desc.key());
        let upload_id = session.open(&opts).await?;
        info!(backend = backend.name(), key = %desc.key(), upload_id = %upload_id, "multipart session initiated");
        desc.upload_session_id = Some(upload_id);
        desc.upload_status = UploadStatus::Initiated;
        Ok(desc)
    }

    /// Upload one part of an open session. Distinct part numbers may be
    /// uploaded concurrently.
    pub async fn upload_part(&self, desc: &TransferDescriptor, part_number: u32, data: impl Into<Bytes>) -> Result<PartDescriptor> {
        let data = data.into();
        let key = desc.key();
        let upload_id = open_session_id(desc)?;
        let backend = self.backend(Some(&desc.backend))?;
        let max_parts = backend.capabilities().max_parts;
        if part_number == 0 || (max_parts > 0 && part_number > max_parts) {
            return Err(TransferError::InvalidRequest(format!(
                "part number {part_number} outside 1..={}",
                if max_parts > 0 { max_parts } else { u32::MAX }
            )));
        }

        let hash = HashInfo::crc32_of(&data);
        let size = data.len() as u64;
        let e_tag = backend
            .upload_part(&key, upload_id, part_number, data)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))?;

        let mut part = PartDescriptor::new(part_number, e_tag, size);
        part.upload_session_id = Some(upload_id.to_string());
        part.url = Some(desc.url.clone());
        part.hash = Some(hash);
        self.recorder.save_part(&part).await.map_err(TransferError::Recorder)?;
        debug!(backend = backend.name(), key = %key, part_number, size, "part uploaded");
        Ok(part)
    }

    /// Merge the parts into the final object. With `parts == None` the part
    /// list is fetched from the backend.
    pub async fn complete_multipart(
        &self,
        desc: &mut TransferDescriptor,
        parts: Option<Vec<PartDescriptor>>,
    ) -> Result<()> {
        let key = desc.key();
        let upload_id = open_session_id(desc)?.to_string();
        let backend = self.backend(Some(&desc.backend))?;
        let backend = backend.as_ref();

        let parts = match parts {
            Some(parts) => parts,
            None if backend.capabilities().supports(Capability::ListParts) => {
                collect_parts(backend, &key, &upload_id).await?
            }
            None => {
                return Err(TransferError::InvalidRequest(format!(
                    "backend `{}` cannot list parts; pass the part list explicitly",
                    backend.name()
                )));
            }
        };

        let mut session = MultipartSession::resume(backend, &key, &upload_id);
        let parts = session.complete_with(parts).await?;
        desc.size = Some(parts.iter().map(|p| p.part_size).sum());
        desc.upload_session_id = None;
        desc.upload_status = UploadStatus::Completed;

        if let Err(e) = self.recorder.update(desc).await {
            let mut cleanup = Cleanup::new(backend);
            cleanup.delete(key.clone());
            cleanup.run().await;
            return Err(TransferError::Recorder(e));
        }
        if let Err(e) = self.recorder.delete_parts_by_session(&upload_id).await {
            warn!(upload_id = %upload_id, error = %e, "could not drop recorded parts");
        }
        info!(backend = backend.name(), key = %key, parts = parts.len(), "multipart upload completed");
        Ok(())
    }

    /// Cancel a session and release backend-side parts.
    pub async fn abort_multipart(&self, desc: &mut TransferDescriptor) -> Result<()> {
        let key = desc.key();
        let upload_id = open_session_id(desc)?.to_string();
        let backend = self.backend(Some(&desc.backend))?;
        backend
            .abort_multipart(&key, &upload_id)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))?;
        desc.upload_session_id = None;
        desc.upload_status = UploadStatus::Aborted;
        if let Err(e) = self.recorder.delete_parts_by_session(&upload_id).await {
            warn!(upload_id = %upload_id, error = %e, "could not drop recorded parts");
        }
        info!(backend = backend.name(), key = %key, "multipart upload aborted");
        Ok(())
    }

    /// One page of parts of an open session; `None` when the backend cannot list parts.
    pub async fn list_parts(
        &self,
        desc: &TransferDescriptor,
        max_parts: Option<u32>,
        part_number_marker: Option<u32>,
    ) -> Result<Option<PartListing>> {
        let key = desc.key();
        let upload_id = open_session_id(desc)?;
        let backend = self.backend(Some(&desc.backend))?;
        if !backend.capabilities().supports(Capability::ListParts) {
            return self.unsupported(backend.name(), Capability::ListParts, None);
        }
        let max_parts = max_parts.unwrap_or(DEFAULT_MAX_LIST_PARTS).clamp(1, DEFAULT_MAX_LIST_PARTS);
        backend
            .list_parts(&key, upload_id, max_parts, part_number_marker)
            .await
            .map(Some)
            .map_err(|e| TransferError::from_backend(backend.name(), &key, e))
    }

    // ------------------------------------------------------------------
    // copy / move
    // ------------------------------------------------------------------

    pub async fn copy_file(&self, src: &TransferDescriptor, request: CopyRequest) -> Result<TransferDescriptor> {
        let plan = self.plan(src, &request, false)?;
        let target = plan.target.as_ref();
        let mut dest = plan.dest;

        if !plan.same_backend {
            return self.cross_copy(src, &dest, request.strict, request.observer).await;
        }

        let copier = SameBackendCopier::new(target, self.config.copy_threshold, self.config.copy_part_size);
        let mut reporter = ProgressReporter::new(request.observer, src.size);
        copier.copy(src, &mut dest, &mut reporter).await?;

        let mut cleanup = Cleanup::new(target);
        if let Some(side) = dest.side_artifact_key() {
            cleanup.delete(side);
        }
        cleanup.delete(dest.key());
        self.record(&dest, cleanup).await?;
        Ok(dest)
    }

    pub async fn move_file(&self, src: &TransferDescriptor, request: MoveRequest) -> Result<TransferDescriptor> {
        let plan = self.plan(src, &request, true)?;
        let target = plan.target.as_ref();
        let mut dest = plan.dest;

        if plan.same_backend {
            let copier = SameBackendCopier::new(target, self.config.copy_threshold, self.config.copy_part_size);
            let mut reporter = ProgressReporter::new(request.observer, src.size);
            copier.relocate(src, &mut dest, &mut reporter).await?;
            self.record(&dest, Cleanup::new(target)).await?;
        } else {
            dest = self.cross_copy(src, &dest, request.strict, request.observer).await?;
            let source = self.backend(Some(&src.backend))?;
            if let Err(e) = remove_source(source.as_ref(), src).await {
                let mut cleanup = Cleanup::new(target);
                if let Some(side) = dest.side_artifact_key() {
                    cleanup.delete(side);
                }
                cleanup.delete(dest.key());
                cleanup.run().await;
                if let Err(re) = self.recorder.delete(&dest.url).await {
                    warn!(url = %dest.url, error = %re, "could not drop record of reverted move");
                }
                return Err(e);
            }
        }

        self.recorder.delete(&src.url).await.map_err(TransferError::Recorder)?;
        Ok(dest)
    }

    fn plan(&self, src: &TransferDescriptor, request: &CopyRequest, moving: bool) -> Result<CopyPlan> {
        let target_name = request.backend.clone().unwrap_or_else(|| src.backend.clone());
        let target = self.backend(Some(&target_name))?;
        let settings = target.settings();

        let path = request
            .path
            .as_deref()
            .map(normalize_dir)
            .unwrap_or_else(|| src.path.clone());
        let filename = request.filename.clone().unwrap_or_else(|| src.filename.clone());
        if filename.is_empty() {
            return Err(TransferError::InvalidRequest("destination filename must not be empty".into()));
        }
        let side_filename = if src.has_side_artifact() {
            let name = request
                .side_artifact_filename
                .clone()
                .or_else(|| src.side_artifact_filename.clone())
                .unwrap_or_default();
            if name.is_empty() {
                return Err(TransferError::InvalidRequest(
                    "destination side artifact filename must not be empty".into(),
                ));
            }
            Some(name)
        } else {
            None
        };

        let mut dest = src.relocated(&target_name, &settings.base_path, &path, &filename, side_filename.as_deref());
        dest.assign_urls(&settings.url_domain());

        let same_place = target_name == src.backend && src.base_path == settings.base_path;
        if same_place {
            if dest.key() == src.key() {
                return Err(TransferError::InvalidRequest(format!(
                    "source and destination are both `{}`",
                    src.key()
                )));
            }
            if dest.side_artifact_key().is_some() && dest.side_artifact_key() == src.side_artifact_key() {
                return Err(TransferError::InvalidRequest(
                    "source and destination side artifacts are the same object".into(),
                ));
            }
        }

        let caps = target.capabilities();
        let native = if moving {
            caps.supports(Capability::SameMove) || caps.supports(Capability::SameCopy)
        } else {
            caps.supports(Capability::SameCopy)
        };
        let same_backend = match request.mode {
            CopyMode::Cross => false,
            CopyMode::Auto => same_place && native,
            CopyMode::Same => {
                if target_name != src.backend {
                    return Err(TransferError::InvalidRequest(format!(
                        "same-backend operation from `{}` to `{target_name}`",
                        src.backend
                    )));
                }
                if src.base_path != settings.base_path {
                    return Err(TransferError::InvalidRequest(format!(
                        "base path `{}` differs from backend base path `{}`",
                        src.base_path, settings.base_path
                    )));
                }
                if !native {
                    let capability = if moving { Capability::SameMove } else { Capability::SameCopy };
                    return Err(TransferError::unsupported(&target_name, capability));
                }
                true
            }
        };
        debug!(src = %src.key(), dst = %dest.key(), target = %target_name, same_backend, moving, "copy planned");

        Ok(CopyPlan {
            target,
            dest,
            same_backend,
        })
    }

    /// Download from the source backend and upload through the normal save path.
    async fn cross_copy(
        &self,
        src: &TransferDescriptor,
        dest: &TransferDescriptor,
        strict: Option<bool>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<TransferDescriptor> {
        let data = self.download(src).await?;
        let mut request = UploadRequest::from_bytes(data)
            .backend(dest.backend.clone())
            .path(dest.path.clone())
            .save_filename(dest.filename.clone());
        request.spec.original_filename = src.original_filename.clone();
        request.spec.content_type = src.content_type.clone();
        request.spec.metadata = src.metadata.clone();
        request.spec.user_metadata = src.user_metadata.clone();
        request.spec.acl = src.acl.clone();
        request.spec.object_id = src.object_id.clone();
        request.spec.object_type = src.object_type.clone();
        request.spec.attrs = src.attrs.clone();
        request.spec.strict = strict;
        request.observer = observer;
        if let Some(hash) = &src.hash {
            request.hashes = hash.digests.keys().copied().collect();
        }

        if let Some(side_filename) = &dest.side_artifact_filename {
            let side = self.download_side_artifact(src).await?;
            request = request.side_artifact(side).side_artifact_filename(side_filename.clone());
            if let Some(side) = request.side_artifact.as_mut() {
                side.content_type = src.side_artifact_content_type.clone();
                side.metadata = src.side_artifact_metadata.clone();
                side.user_metadata = src.side_artifact_user_metadata.clone();
                side.acl = src.side_artifact_acl.clone();
            }
        }
        info!(src_backend = %src.backend, dst_backend = %dest.backend, src = %src.key(), dst = %dest.key(), "cross-backend copy");
        self.upload(request).await
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    async fn lookup(&self, url: &str) -> Result<Option<TransferDescriptor>> {
        self.recorder.get_by_url(url).await.map_err(TransferError::Recorder)
    }

    /// Hand `desc` to the recorder; a failure or rejection runs `cleanup`.
    async fn record(&self, desc: &TransferDescriptor, cleanup: Cleanup<'_>) -> Result<()> {
        let err = match self.recorder.save(desc).await {
            Ok(true) => return Ok(()),
            Ok(false) => anyhow!("recorder rejected `{}`", desc.url),
            Err(e) => e,
        };
        cleanup.run().await;
        Err(TransferError::Recorder(err))
    }

    fn unsupported<T>(&self, backend: &str, capability: Capability, fallback: T) -> Result<T> {
        if self.config.strict_capabilities {
            Err(TransferError::unsupported(backend, capability))
        } else {
            debug!(backend, %capability, "capability not supported; returning fallback");
            Ok(fallback)
        }
    }
}

struct CopyPlan {
    target: Arc<dyn StorageBackend>,
    dest: TransferDescriptor,
    same_backend: bool,
}

fn open_session_id(desc: &TransferDescriptor) -> Result<&str> {
    desc.upload_session_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TransferError::session(&desc.key(), "descriptor has no open upload session"))
}

fn translate(backend: &dyn StorageBackend, acl: &Acl) -> Result<String> {
    backend.translate_acl(acl).ok_or_else(|| TransferError::UnrecognizedAcl {
        backend: backend.name().to_string(),
        acl: acl.to_string(),
    })
}

/// Check requested attributes against the backend's capabilities and build
/// the put options for the primary object and the side artifact. Strict mode
/// fails on the first unsupported attribute; otherwise it is dropped.
fn negotiate(backend: &dyn StorageBackend, desc: &mut TransferDescriptor, strict: bool) -> Result<(PutOptions, PutOptions)> {
    let caps = backend.capabilities();
    let name = backend.name();

    let reject = |capability: Capability, what: &str| -> Result<()> {
        if strict {
            Err(TransferError::unsupported(name, capability))
        } else {
            warn!(backend = name, %capability, what, "backend lacks capability; dropping attribute");
            Ok(())
        }
    };

    if !caps.supports(Capability::Metadata) {
        if !desc.metadata.is_empty() || !desc.user_metadata.is_empty() {
            reject(Capability::Metadata, "metadata")?;
            desc.metadata.clear();
            desc.user_metadata.clear();
        }
        if !desc.side_artifact_metadata.is_empty() || !desc.side_artifact_user_metadata.is_empty() {
            reject(Capability::Metadata, "side artifact metadata")?;
            desc.side_artifact_metadata.clear();
            desc.side_artifact_user_metadata.clear();
        }
    }

    if desc.acl.as_ref().is_some_and(Acl::is_blank) {
        desc.acl = None;
    }
    if desc.side_artifact_acl.as_ref().is_some_and(Acl::is_blank) {
        desc.side_artifact_acl = None;
    }

    let mut acl = None;
    let mut side_acl = None;
    if caps.supports(Capability::Acl) {
        let default_acl = backend.settings().default_acl.clone();
        if desc.acl.is_none() {
            desc.acl = default_acl.clone();
        }
        if desc.has_side_artifact() && desc.side_artifact_acl.is_none() {
            desc.side_artifact_acl = default_acl;
        }
        acl = desc.acl.as_ref().map(|a| translate(backend, a)).transpose()?;
        side_acl = desc.side_artifact_acl.as_ref().map(|a| translate(backend, a)).transpose()?;
    } else {
        if desc.acl.is_some() {
            reject(Capability::Acl, "acl")?;
            desc.acl = None;
        }
        if desc.side_artifact_acl.is_some() {
            reject(Capability::Acl, "side artifact acl")?;
            desc.side_artifact_acl = None;
        }
    }

    let opts = PutOptions {
        content_type: desc.content_type.clone(),
        metadata: desc.metadata.clone(),
        user_metadata: desc.user_metadata.clone(),
        acl,
    };
    let side_opts = PutOptions {
        content_type: desc.side_artifact_content_type.clone(),
        metadata: desc.side_artifact_metadata.clone(),
        user_metadata: desc.side_artifact_user_metadata.clone(),
        acl: side_acl,
    };
    Ok((opts, side_opts))
}

async fn open_source(backend: &str, source: TransferSource, size: Option<u64>) -> Result<(BoxedReader, Option<u64>)> {
    match source {
        TransferSource::Bytes(data) => Ok((Box::new(std::io::Cursor::new(data)), size)),
        TransferSource::Reader(reader) => Ok((reader, size)),
        TransferSource::File(path) => {
            let io_err = |e: std::io::Error| {
                TransferError::from_backend(backend, &path.display().to_string(), BackendError::Io(e))
            };
            let file = tokio::fs::File::open(&path).await.map_err(io_err)?;
            let len = file.metadata().await.map_err(io_err)?.len();
            Ok((Box::new(file), Some(len)))
        }
    }
}

/// Read up to `limit` bytes; fewer only at end of stream.
async fn read_chunk(reader: &mut BoxedReader, limit: u64) -> std::io::Result<Bytes> {
    let mut buf = Vec::with_capacity(limit.min(crate::constants::DEFAULT_STREAM_BUFFER_SIZE as u64 * 8) as usize);
    reader.take(limit).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

async fn put_single(
    backend: &dyn StorageBackend,
    key: &str,
    mut reader: BoxedReader,
    opts: &PutOptions,
    hashes: &[HashAlgorithm],
    reporter: &mut ProgressReporter,
) -> Result<(u64, HashInfo)> {
    reporter.start();
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| TransferError::from_backend(backend.name(), key, BackendError::Io(e)))?;
    let data = Bytes::from(buf);
    let len = data.len() as u64;
    let mut hasher = ContentHasher::new(hashes);
    hasher.update(&data);
    let hash = hasher.finish();
    debug!(backend = backend.name(), key, len, "single-shot put");

    if let Err(e) = backend.put_object(key, data, opts).await {
        let mut cleanup = Cleanup::new(backend);
        cleanup.delete(key);
        cleanup.run().await;
        return Err(TransferError::from_backend(backend.name(), key, e));
    }
    reporter.progress(len);
    Ok((len, hash))
}

#[allow(clippy::too_many_arguments)]
async fn put_chunked(
    backend: &dyn StorageBackend,
    key: &str,
    mut reader: BoxedReader,
    part_size: u64,
    opts: &PutOptions,
    hashes: &[HashAlgorithm],
    reporter: &mut ProgressReporter,
    desc: &mut TransferDescriptor,
) -> Result<(u64, HashInfo)> {
    let mut session = MultipartSession::new(backend, key).hash_with(hashes);
    let outcome: Result<()> = async {
        let upload_id = session.open(opts).await?;
        desc.upload_session_id = Some(upload_id);
        reporter.start();
        loop {
            let chunk = read_chunk(&mut reader, part_size)
                .await
                .map_err(|e| TransferError::from_backend(backend.name(), key, BackendError::Io(e)))?;
            let len = chunk.len() as u64;
            if len == 0 && !session.parts().is_empty() {
                break;
            }
            session.upload_part(chunk).await?;
            reporter.progress(session.total_bytes());
            if len < part_size {
                break;
            }
        }
        session.complete().await?;
        Ok(())
    }
    .await;

    desc.upload_session_id = None;
    if let Err(e) = outcome {
        session.abort().await;
        return Err(e);
    }
    Ok((session.total_bytes(), session.hash()))
}

/// Every part of an open session, page by page.
async fn collect_parts(backend: &dyn StorageBackend, key: &str, upload_id: &str) -> Result<Vec<PartDescriptor>> {
    let mut parts = Vec::new();
    let mut marker = None;
    loop {
        let page = backend
            .list_parts(key, upload_id, DEFAULT_MAX_LIST_PARTS, marker)
            .await
            .map_err(|e| TransferError::from_backend(backend.name(), key, e))?;
        parts.extend(page.parts);
        match page.next_part_number_marker {
            Some(next) if page.is_truncated => marker = Some(next),
            _ => break,
        }
    }
    Ok(parts)
}

/// Delete the primary, then the side artifact, of a cross-backend move source.
/// The primary must be confirmed gone; a stuck side artifact only warns.
async fn remove_source(backend: &dyn StorageBackend, src: &TransferDescriptor) -> Result<()> {
    let key = src.key();
    if let Err(e) = backend.delete_object(&key).await {
        let still_there = backend.exists(&key).await.unwrap_or(true);
        if still_there {
            return Err(TransferError::from_backend(backend.name(), &key, e));
        }
    }
    if let Some(side_key) = src.side_artifact_key() {
        if let Err(e) = backend.delete_object(&side_key).await {
            warn!(backend = backend.name(), key = %side_key, error = %e, "source side artifact left behind after move");
        }
    }
    Ok(())
}
