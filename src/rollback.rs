// src/rollback.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Best-effort cleanup after a failed transfer.
//!
//! Keys are queued as objects get written and deleted, most recent first,
//! when the operation fails. Each cleanup error is logged and dropped so the
//! original failure stays the one the caller sees. Nothing is retried.
//! Multipart sessions clean up through `MultipartSession::abort`.

use tracing::{debug, warn};

use crate::backend::StorageBackend;

pub(crate) struct Cleanup<'a> {
    backend: &'a dyn StorageBackend,
    keys: Vec<String>,
}

impl<'a> Cleanup<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend) -> Self {
        Self {
            backend,
            keys: Vec::new(),
        }
    }

    pub(crate) fn delete(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    pub(crate) async fn run(self) {
        let backend = self.backend;
        for key in self.keys.into_iter().rev() {
            match backend.delete_object(&key).await {
                Ok(()) => debug!(backend = backend.name(), key = %key, "cleanup removed object"),
                Err(e) => warn!(
                    backend = backend.name(),
                    key = %key,
                    error = %e,
                    "cleanup failed; leaving object behind"
                ),
            }
        }
    }
}
