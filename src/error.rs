// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Error taxonomy.
//!
//! Adapters speak [`BackendError`]; each one translates its vendor's error
//! shapes into it exactly once. The orchestrator wraps those into
//! [`TransferError`] together with the backend name and the affected key.

use thiserror::Error;

use crate::capability::Capability;

/// Errors raised at the adapter boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object `{0}` not found")]
    NotFound(String),

    #[error("upload session `{0}` does not exist or is already closed")]
    NoSuchSession(String),

    #[error("operation requires unsupported capability `{0}`")]
    Unsupported(Capability),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by [`crate::TransferService`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer of `{key}` on backend `{backend}` failed: {source}")]
    Transfer {
        backend: String,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("`{key}` not found on backend `{backend}`")]
    NotFound { backend: String, key: String },

    #[error("backend `{backend}` does not support {capability}")]
    UnsupportedCapability {
        backend: String,
        capability: Capability,
    },

    #[error("backend `{backend}` cannot translate ACL `{acl}`")]
    UnrecognizedAcl { backend: String, acl: String },

    #[error("invalid upload session for `{key}`: {reason}")]
    SessionState { key: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no backend registered under `{0}`")]
    BackendNotFound(String),

    #[error("recorder failed: {0}")]
    Recorder(#[source] anyhow::Error),
}

impl TransferError {
    /// Attach backend and key context to an adapter error.
    pub fn from_backend(backend: &str, key: &str, err: BackendError) -> Self {
        match err {
            BackendError::NotFound(_) => TransferError::NotFound {
                backend: backend.to_string(),
                key: key.to_string(),
            },
            BackendError::NoSuchSession(id) => TransferError::SessionState {
                key: key.to_string(),
                reason: format!("session `{id}` does not exist or is already closed"),
            },
            BackendError::Unsupported(capability) => TransferError::UnsupportedCapability {
                backend: backend.to_string(),
                capability,
            },
            source => TransferError::Transfer {
                backend: backend.to_string(),
                key: key.to_string(),
                source,
            },
        }
    }

    pub fn unsupported(backend: &str, capability: Capability) -> Self {
        TransferError::UnsupportedCapability {
            backend: backend.to_string(),
            capability,
        }
    }

    pub fn session(key: &str, reason: impl Into<String>) -> Self {
        TransferError::SessionState {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, TransferError::UnsupportedCapability { .. })
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
