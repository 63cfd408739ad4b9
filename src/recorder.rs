// src/recorder.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Persistence hook for finished transfers.
//!
//! The engine calls a [`Recorder`] only after a transfer or removal has
//! succeeded, never mid-transfer. Storing records durably is the
//! implementor's business.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::descriptor::{PartDescriptor, TransferDescriptor};

#[async_trait]
pub trait Recorder: Send + Sync {
    /// Persist a finished transfer. `false` means the record was rejected.
    async fn save(&self, descriptor: &TransferDescriptor) -> Result<bool>;

    async fn update(&self, descriptor: &TransferDescriptor) -> Result<()>;

    async fn get_by_url(&self, url: &str) -> Result<Option<TransferDescriptor>>;

    async fn delete(&self, url: &str) -> Result<bool>;

    async fn save_part(&self, _part: &PartDescriptor) -> Result<()> {
        Ok(())
    }

    async fn delete_parts_by_session(&self, _upload_session_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Accepts every record and keeps none; lookups by URL are unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

#[async_trait]
impl Recorder for NoopRecorder {
    async fn save(&self, _descriptor: &TransferDescriptor) -> Result<bool> {
        Ok(true)
    }

    async fn update(&self, _descriptor: &TransferDescriptor) -> Result<()> {
        Ok(())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<TransferDescriptor>> {
        bail!("no recorder configured; cannot resolve `{url}`")
    }

    async fn delete(&self, _url: &str) -> Result<bool> {
        Ok(true)
    }
}

/// In-process record store keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    files: Mutex<HashMap<String, TransferDescriptor>>,
    parts: Mutex<HashMap<String, Vec<PartDescriptor>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.lock().await.is_empty()
    }

    /// Parts saved for an open session, ordered by part number.
    pub async fn parts_for(&self, upload_session_id: &str) -> Vec<PartDescriptor> {
        let mut parts = self
            .parts
            .lock()
            .await
            .get(upload_session_id)
            .cloned()
            .unwrap_or_default();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn save(&self, descriptor: &TransferDescriptor) -> Result<bool> {
        self.files
            .lock()
            .await
            .insert(descriptor.url.clone(), descriptor.clone());
        Ok(true)
    }

    async fn update(&self, descriptor: &TransferDescriptor) -> Result<()> {
        self.files
            .lock()
            .await
            .insert(descriptor.url.clone(), descriptor.clone());
        Ok(())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<TransferDescriptor>> {
        Ok(self.files.lock().await.get(url).cloned())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        Ok(self.files.lock().await.remove(url).is_some())
    }

    async fn save_part(&self, part: &PartDescriptor) -> Result<()> {
        let Some(session) = part.upload_session_id.clone() else {
            bail!("part {} has no upload session id", part.part_number);
        };
        let mut parts = self.parts.lock().await;
        let entry = parts.entry(session).or_default();
        entry.retain(|p| p.part_number != part.part_number);
        entry.push(part.clone());
        Ok(())
    }

    async fn delete_parts_by_session(&self, upload_session_id: &str) -> Result<()> {
        self.parts.lock().await.remove(upload_session_id);
        Ok(())
    }
}
