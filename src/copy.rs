// src/copy.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Same-backend copy and move.
//
// Small objects take one server-side copy (or rename) call. Objects at or
// above the copy threshold are copied range by range into a destination
// multipart session when the backend supports part copy. A side artifact is
// handled independently with the same rule. Moves never leave the object
// duplicated or lost: failures are inspected and reverted.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{PutOptions, StorageBackend};
use crate::capability::Capability;
use crate::descriptor::TransferDescriptor;
use crate::error::{Result, TransferError};
use crate::multipart::MultipartSession;
use crate::progress::{ProgressObserver, ProgressReporter};
use crate::rollback::Cleanup;

/// How a copy or move is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Same-backend when possible, otherwise download and re-upload.
    #[default]
    Auto,
    /// Server-side on one backend only; fails if unsupported.
    Same,
    /// Always download from the source and upload to the target.
    Cross,
}

/// Copy/move destination. Unset fields keep the source's values.
#[derive(Clone, Default)]
pub struct CopyRequest {
    pub(crate) backend: Option<String>,
    pub(crate) path: Option<String>,
    pub(crate) filename: Option<String>,
    pub(crate) side_artifact_filename: Option<String>,
    pub(crate) mode: CopyMode,
    /// Per-request override of `TransferConfig::strict_capabilities` for the
    /// attributes a cross-backend copy carries over.
    pub(crate) strict: Option<bool>,
    pub(crate) observer: Option<Arc<dyn ProgressObserver>>,
}

impl std::fmt::Debug for CopyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyRequest")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("filename", &self.filename)
            .field("side_artifact_filename", &self.side_artifact_filename)
            .field("mode", &self.mode)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl CopyRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn side_artifact_filename(mut self, filename: impl Into<String>) -> Self {
        self.side_artifact_filename = Some(filename.into());
        self
    }

    pub fn mode(mut self, mode: CopyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Drop ACL or metadata the target cannot store instead of failing.
    pub fn best_effort(self) -> Self {
        self.strict(false)
    }

    pub fn progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Moves use the same destination description as copies.
pub type MoveRequest = CopyRequest;

/// Attributes of `desc`'s primary object, as the backend spells them.
pub(crate) fn primary_options(backend: &dyn StorageBackend, desc: &TransferDescriptor) -> PutOptions {
    PutOptions {
        content_type: desc.content_type.clone(),
        metadata: desc.metadata.clone(),
        user_metadata: desc.user_metadata.clone(),
        acl: desc.acl.as_ref().and_then(|a| backend.translate_acl(a)),
    }
}

pub(crate) fn side_artifact_options(backend: &dyn StorageBackend, desc: &TransferDescriptor) -> PutOptions {
    PutOptions {
        content_type: desc.side_artifact_content_type.clone(),
        metadata: desc.side_artifact_metadata.clone(),
        user_metadata: desc.side_artifact_user_metadata.clone(),
        acl: desc.side_artifact_acl.as_ref().and_then(|a| backend.translate_acl(a)),
    }
}

pub(crate) struct SameBackendCopier<'a> {
    backend: &'a dyn StorageBackend,
    copy_threshold: u64,
    copy_part_size: u64,
}

impl<'a> SameBackendCopier<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend, copy_threshold: u64, copy_part_size: u64) -> Self {
        Self {
            backend,
            copy_threshold,
            copy_part_size: copy_part_size.max(1),
        }
    }

    /// Copy `src` to `dest`, side artifact first. On failure nothing is left at `dest`.
    pub(crate) async fn copy(
        &self,
        src: &TransferDescriptor,
        dest: &mut TransferDescriptor,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        self.copy_objects(src, dest, reporter).await?;
        reporter.finish();
        info!(backend = self.backend.name(), src = %src.key(), dst = %dest.key(), "copy complete");
        Ok(())
    }

    /// Move `src` to `dest`, by native rename or by copy then delete.
    pub(crate) async fn relocate(
        &self,
        src: &TransferDescriptor,
        dest: &mut TransferDescriptor,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        if self.backend.capabilities().supports(Capability::SameMove) {
            self.rename_objects(src, dest, reporter).await?;
        } else {
            self.copy_then_delete(src, dest, reporter).await?;
        }
        reporter.finish();
        info!(backend = self.backend.name(), src = %src.key(), dst = %dest.key(), "move complete");
        Ok(())
    }

    async fn copy_objects(
        &self,
        src: &TransferDescriptor,
        dest: &mut TransferDescriptor,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let src_key = src.key();
        let dst_key = dest.key();
        let size = self.stat_size(&src_key).await?;
        dest.size = Some(size);

        let mut cleanup = Cleanup::new(self.backend);
        if let (Some(src_side), Some(dst_side)) = (src.side_artifact_key(), dest.side_artifact_key()) {
            let side_size = self.stat_size(&src_side).await?;
            let opts = side_artifact_options(self.backend, dest);
            let mut silent = ProgressReporter::new(None, None);
            self.copy_one(&src_side, &dst_side, side_size, &opts, &mut silent).await?;
            dest.side_artifact_size = Some(side_size);
            cleanup.delete(dst_side);
        }

        reporter.set_total(size);
        reporter.start();
        let opts = primary_options(self.backend, dest);
        if let Err(e) = self.copy_one(&src_key, &dst_key, size, &opts, reporter).await {
            cleanup.run().await;
            return Err(e);
        }
        Ok(())
    }

    /// One object, single call below the threshold, range copy at or above it.
    async fn copy_one(
        &self,
        src: &str,
        dst: &str,
        size: u64,
        opts: &PutOptions,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let chunked = size > 0
            && size >= self.copy_threshold
            && self.backend.capabilities().supports(Capability::PartCopy);

        if !chunked {
            debug!(backend = self.backend.name(), src, dst, size, "single copy");
            if let Err(e) = self.backend.copy_object(src, dst, opts).await {
                let mut cleanup = Cleanup::new(self.backend);
                cleanup.delete(dst);
                cleanup.run().await;
                return Err(TransferError::from_backend(self.backend.name(), dst, e));
            }
            reporter.progress(size);
            return Ok(());
        }

        debug!(backend = self.backend.name(), src, dst, size, part_size = self.copy_part_size, "chunked copy");
        let mut session = MultipartSession::new(self.backend, dst);
        let outcome: Result<()> = async {
            session.open(opts).await?;
            let mut offset = 0u64;
            while offset < size {
                let end = (offset + self.copy_part_size).min(size);
                session.copy_part(src, offset..end).await?;
                offset = end;
                reporter.progress(offset);
            }
            session.complete().await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            session.abort().await;
            return Err(e);
        }
        Ok(())
    }

    async fn rename_objects(
        &self,
        src: &TransferDescriptor,
        dest: &mut TransferDescriptor,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let src_key = src.key();
        let dst_key = dest.key();
        let size = self.stat_size(&src_key).await?;
        dest.size = Some(size);

        let sides = match (src.side_artifact_key(), dest.side_artifact_key()) {
            (Some(s), Some(d)) => {
                let side_size = self.stat_size(&s).await?;
                dest.side_artifact_size = Some(side_size);
                self.rename_checked(&s, &d).await?;
                Some((s, d))
            }
            _ => None,
        };

        reporter.set_total(size);
        reporter.start();
        if let Err(e) = self.rename_checked(&src_key, &dst_key).await {
            if let Some((s, d)) = sides {
                // put the side artifact back where it was
                if let Err(undo) = self.backend.rename_object(&d, &s).await {
                    warn!(backend = self.backend.name(), from = %d, to = %s, error = %undo, "could not move side artifact back");
                }
            }
            return Err(e);
        }
        reporter.progress(size);
        Ok(())
    }

    /// Rename, and if the backend reports an error, look at what actually happened.
    async fn rename_checked(&self, src: &str, dst: &str) -> Result<()> {
        let err = match self.backend.rename_object(src, dst).await {
            Ok(()) => return Ok(()),
            Err(e) => TransferError::from_backend(self.backend.name(), src, e),
        };

        let src_exists = self.backend.exists(src).await;
        let dst_exists = self.backend.exists(dst).await;
        match (src_exists, dst_exists) {
            (Ok(false), Ok(true)) => {
                warn!(backend = self.backend.name(), src, dst, error = %err, "rename reported failure but the object moved");
                Ok(())
            }
            (Ok(true), Ok(true)) => {
                warn!(backend = self.backend.name(), src, dst, "rename left both copies; removing destination");
                let mut cleanup = Cleanup::new(self.backend);
                cleanup.delete(dst);
                cleanup.run().await;
                Err(err)
            }
            _ => Err(err),
        }
    }

    async fn copy_then_delete(
        &self,
        src: &TransferDescriptor,
        dest: &mut TransferDescriptor,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        self.copy_objects(src, dest, reporter).await?;

        if let Some(src_side) = src.side_artifact_key() {
            if let Err(e) = self.delete_confirmed(&src_side).await {
                self.revert_copy(dest).await;
                return Err(e);
            }
        }

        if let Err(e) = self.delete_confirmed(&src.key()).await {
            if let (Some(src_side), Some(dst_side)) = (src.side_artifact_key(), dest.side_artifact_key()) {
                let opts = side_artifact_options(self.backend, src);
                if let Err(restore) = self.backend.copy_object(&dst_side, &src_side, &opts).await {
                    warn!(backend = self.backend.name(), key = %src_side, error = %restore, "could not restore source side artifact");
                }
            }
            self.revert_copy(dest).await;
            return Err(e);
        }
        Ok(())
    }

    /// Delete `key`; a reported failure counts as success if the object is gone.
    async fn delete_confirmed(&self, key: &str) -> Result<()> {
        let err = match self.backend.delete_object(key).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        match self.backend.exists(key).await {
            Ok(false) => {
                debug!(backend = self.backend.name(), key, error = %err, "delete reported failure but the object is gone");
                Ok(())
            }
            _ => Err(TransferError::from_backend(self.backend.name(), key, err)),
        }
    }

    async fn revert_copy(&self, dest: &TransferDescriptor) {
        let mut cleanup = Cleanup::new(self.backend);
        if let Some(side) = dest.side_artifact_key() {
            cleanup.delete(side);
        }
        cleanup.delete(dest.key());
        cleanup.run().await;
    }

    async fn stat_size(&self, key: &str) -> Result<u64> {
        match self.backend.head_object(key).await {
            Ok(Some(stat)) => Ok(stat.size),
            Ok(None) => Err(TransferError::NotFound {
                backend: self.backend.name().to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(TransferError::from_backend(self.backend.name(), key, e)),
        }
    }
}
