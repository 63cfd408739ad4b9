// src/multipart.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Chunked transfer sessions over any backend that declares multipart support.
//
// Design:
// - choose_mode() fixes single-shot vs chunked once, before any byte is read.
// - MultipartSession drives NotStarted -> SessionOpen -> PartsUploading ->
//   Completed, or Aborted from any non-terminal state.
// - Part numbers start at 1 and increase by one per part; the part list is
//   validated (sorted, gapless, unique) before completion reaches the backend.
// - abort() is best-effort: failures are logged and never returned.

use std::ops::Range;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::backend::{PutOptions, StorageBackend};
use crate::capability::CapabilityDescriptor;
use crate::descriptor::{HashInfo, PartDescriptor};
use crate::error::{Result, TransferError};
use crate::hash::{ContentHasher, HashAlgorithm};

/// How the primary bytes of a transfer are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    SingleShot,
    Chunked,
}

/// Chunked when the size is unknown or at least `threshold`, provided the
/// backend can do multipart at all.
pub fn choose_mode(size: Option<u64>, threshold: u64, caps: &CapabilityDescriptor) -> TransferMode {
    let wants_chunked = match size {
        None => true,
        Some(s) => s >= threshold,
    };
    if wants_chunked && caps.multipart_upload {
        TransferMode::Chunked
    } else {
        TransferMode::SingleShot
    }
}

/// Sort `parts` by part number and check they form `1..=N` with no
/// duplicates, bounded by `max_parts` (0 = unbounded).
pub fn validate_part_sequence(parts: &mut [PartDescriptor], max_parts: u32) -> std::result::Result<(), String> {
    if parts.is_empty() {
        return Err("no parts to complete".to_string());
    }
    parts.sort_by_key(|p| p.part_number);

    for idx in 0..parts.len() {
        let expected = idx as u32 + 1;
        let actual = parts[idx].part_number;
        if actual == expected {
            if parts[idx].e_tag.is_empty() {
                return Err(format!("part {actual} has an empty ETag"));
            }
            continue;
        }
        if idx > 0 && parts[idx - 1].part_number == actual {
            return Err(format!("duplicate part number {actual}"));
        }
        return Err(format!("missing part number {expected}"));
    }

    if max_parts > 0 && parts.len() > max_parts as usize {
        return Err(format!("{} parts exceed the backend limit of {max_parts}", parts.len()));
    }
    Ok(())
}

/// Lifecycle of a chunked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    SessionOpen,
    PartsUploading,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// One multipart session against one backend key.
pub struct MultipartSession<'a> {
    backend: &'a dyn StorageBackend,
    key: String,
    upload_id: Option<String>,
    state: SessionState,
    parts: Vec<PartDescriptor>,
    next_part_number: u32,
    total_bytes: u64,
    hasher: ContentHasher,
}

impl<'a> MultipartSession<'a> {
    pub fn new(backend: &'a dyn StorageBackend, key: &str) -> Self {
        Self {
            backend,
            key: key.to_string(),
            upload_id: None,
            state: SessionState::NotStarted,
            parts: Vec::new(),
            next_part_number: 1,
            total_bytes: 0,
            hasher: ContentHasher::default(),
        }
    }

    /// Re-attach to a session opened earlier, possibly by another process.
    pub fn resume(backend: &'a dyn StorageBackend, key: &str, upload_id: &str) -> Self {
        let mut session = Self::new(backend, key);
        session.upload_id = Some(upload_id.to_string());
        session.state = SessionState::SessionOpen;
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    /// Bytes accepted so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Also compute `algorithms` over the uploaded bytes.
    pub fn hash_with(mut self, algorithms: &[HashAlgorithm]) -> Self {
        self.hasher = ContentHasher::new(algorithms);
        self
    }

    /// Digests over every byte passed to `upload_part`, in order.
    pub fn hash(&self) -> HashInfo {
        self.hasher.snapshot()
    }

    /// NotStarted -> SessionOpen.
    pub async fn open(&mut self, opts: &PutOptions) -> Result<String> {
        if self.state != SessionState::NotStarted {
            return Err(TransferError::session(
                &self.key,
                format!("cannot open a session in state {:?}", self.state),
            ));
        }
        let upload_id = self
            .backend
            .create_multipart(&self.key, opts)
            .await
            .map_err(|e| TransferError::from_backend(self.backend.name(), &self.key, e))?;
        if upload_id.is_empty() {
            return Err(TransferError::session(&self.key, "backend returned an empty session id"));
        }
        debug!(backend = self.backend.name(), key = %self.key, upload_id = %upload_id, "multipart session opened");
        self.upload_id = Some(upload_id.clone());
        self.state = SessionState::SessionOpen;
        Ok(upload_id)
    }

    /// Upload `data` as the next part.
    pub async fn upload_part(&mut self, data: Bytes) -> Result<&PartDescriptor> {
        let (upload_id, part_number) = self.next_slot()?;
        let len = data.len() as u64;
        self.hasher.update(&data);
        trace!(key = %self.key, part_number, len, "uploading part");

        let e_tag = self
            .backend
            .upload_part(&self.key, &upload_id, part_number, data)
            .await
            .map_err(|e| TransferError::from_backend(self.backend.name(), &self.key, e))?;
        Ok(self.record_part(&upload_id, part_number, e_tag, len))
    }

    /// Copy `range` of `src` (same backend) as the next part.
    pub async fn copy_part(&mut self, src: &str, range: Range<u64>) -> Result<&PartDescriptor> {
        let (upload_id, part_number) = self.next_slot()?;
        let len = range.end.saturating_sub(range.start);
        trace!(src, key = %self.key, part_number, start = range.start, end = range.end, "copying part");

        let e_tag = self
            .backend
            .upload_part_copy(src, &self.key, &upload_id, part_number, range)
            .await
            .map_err(|e| TransferError::from_backend(self.backend.name(), &self.key, e))?;
        Ok(self.record_part(&upload_id, part_number, e_tag, len))
    }

    /// PartsUploading -> Completed with the parts this session accumulated.
    pub async fn complete(&mut self) -> Result<Vec<PartDescriptor>> {
        if self.state == SessionState::SessionOpen {
            return Err(TransferError::session(&self.key, "no parts were uploaded"));
        }
        let parts = self.parts.clone();
        self.complete_with(parts).await
    }

    /// Complete with a caller-gathered part list (manual flows).
    pub async fn complete_with(&mut self, mut parts: Vec<PartDescriptor>) -> Result<Vec<PartDescriptor>> {
        let upload_id = self.open_upload_id()?;
        validate_part_sequence(&mut parts, self.backend.capabilities().max_parts)
            .map_err(|reason| TransferError::session(&self.key, reason))?;

        self.backend
            .complete_multipart(&self.key, &upload_id, &parts)
            .await
            .map_err(|e| TransferError::from_backend(self.backend.name(), &self.key, e))?;

        debug!(backend = self.backend.name(), key = %self.key, parts = parts.len(), "multipart session completed");
        self.state = SessionState::Completed;
        self.upload_id = None;
        Ok(parts)
    }

    /// Release backend resources. Never fails; errors are logged.
    pub async fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self.backend.abort_multipart(&self.key, &upload_id).await {
                warn!(
                    backend = self.backend.name(),
                    key = %self.key,
                    upload_id = %upload_id,
                    error = %e,
                    "abort of multipart session failed; ignoring"
                );
            } else {
                debug!(backend = self.backend.name(), key = %self.key, upload_id = %upload_id, "multipart session aborted");
            }
        }
        self.state = SessionState::Aborted;
    }

    fn open_upload_id(&self) -> Result<String> {
        match (&self.upload_id, self.state) {
            (Some(id), SessionState::SessionOpen | SessionState::PartsUploading) => Ok(id.clone()),
            (_, state) => Err(TransferError::session(
                &self.key,
                format!("session is not open (state {state:?})"),
            )),
        }
    }

    fn next_slot(&self) -> Result<(String, u32)> {
        let upload_id = self.open_upload_id()?;
        let max_parts = self.backend.capabilities().max_parts;
        if max_parts > 0 && self.next_part_number > max_parts {
            return Err(TransferError::session(
                &self.key,
                format!("part limit of {max_parts} reached; increase the part size"),
            ));
        }
        Ok((upload_id, self.next_part_number))
    }

    fn record_part(&mut self, upload_id: &str, part_number: u32, e_tag: String, len: u64) -> &PartDescriptor {
        let mut part = PartDescriptor::new(part_number, e_tag, len);
        part.upload_session_id = Some(upload_id.to_string());
        self.parts.push(part);
        self.next_part_number += 1;
        self.total_bytes += len;
        self.state = SessionState::PartsUploading;
        &self.parts[self.parts.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(numbers: &[u32]) -> Vec<PartDescriptor> {
        numbers
            .iter()
            .map(|&n| PartDescriptor::new(n, format!("etag-{n}"), 1))
            .collect()
    }

    #[test]
    fn mode_follows_threshold_and_capability() {
        let caps = CapabilityDescriptor::full();
        assert_eq!(choose_mode(Some(7), 8, &caps), TransferMode::SingleShot);
        assert_eq!(choose_mode(Some(8), 8, &caps), TransferMode::Chunked);
        assert_eq!(choose_mode(None, 8, &caps), TransferMode::Chunked);

        let single_only = CapabilityDescriptor::minimal();
        assert_eq!(choose_mode(None, 8, &single_only), TransferMode::SingleShot);
        assert_eq!(choose_mode(Some(100), 8, &single_only), TransferMode::SingleShot);
    }

    #[test]
    fn sequence_is_sorted_before_checking() {
        let mut p = parts(&[3, 1, 2]);
        validate_part_sequence(&mut p, 0).unwrap();
        let numbers: Vec<u32> = p.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn gaps_duplicates_and_limits_are_rejected() {
        assert_eq!(
            validate_part_sequence(&mut parts(&[1, 3]), 0).unwrap_err(),
            "missing part number 2"
        );
        assert_eq!(
            validate_part_sequence(&mut parts(&[2, 3]), 0).unwrap_err(),
            "missing part number 1"
        );
        assert_eq!(
            validate_part_sequence(&mut parts(&[1, 2, 2]), 0).unwrap_err(),
            "duplicate part number 2"
        );
        assert!(validate_part_sequence(&mut parts(&[]), 0).is_err());
        assert!(validate_part_sequence(&mut parts(&[1, 2, 3]), 2).is_err());

        let mut blank = parts(&[1]);
        blank[0].e_tag.clear();
        assert!(validate_part_sequence(&mut blank, 0).is_err());
    }
}
