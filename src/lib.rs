// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: module tree plus the public re-exports.

//! Backend-agnostic file transfer orchestration.
//!
//! A [`TransferService`] fronts any number of [`StorageBackend`] adapters.
//! Each adapter declares what it can do in a [`CapabilityDescriptor`]; the
//! service negotiates every request against that table, picks single-shot or
//! chunked transfer, reports progress, rolls back on failure and hands the
//! finished [`TransferDescriptor`] to a [`Recorder`].

pub mod acl;
pub mod backend;
pub mod capability;
pub mod config;
pub mod constants;
pub mod copy;
pub mod descriptor;
pub mod error;
pub mod file_store;
pub mod hash;
pub mod listing;
pub mod memory_store;
pub mod multipart;
pub mod pretreatment;
pub mod progress;
pub mod recorder;
pub mod service;

mod rollback;

#[cfg(feature = "s3")]
pub mod s3_store;

pub use acl::Acl;
pub use backend::{
    BackendResult, HttpMethod, LazyClient, ObjectEntry, ObjectListing, ObjectStat, PartListing, PresignRequest,
    PutOptions, StorageBackend,
};
pub use capability::{Capability, CapabilityDescriptor};
pub use config::{BackendSettings, TransferConfig};
pub use copy::{CopyMode, CopyRequest, MoveRequest};
pub use descriptor::{HashInfo, PartDescriptor, TransferDescriptor, UploadStatus};
pub use error::{BackendError, Result, TransferError};
pub use file_store::FileSystemBackend;
pub use hash::{ContentHasher, HashAlgorithm};
pub use listing::{ListFilesRequest, ListFilesResult, RemoteDirInfo, RemoteFileInfo};
pub use memory_store::MemoryBackend;
pub use multipart::{MultipartSession, SessionState, TransferMode};
pub use pretreatment::{InitiateMultipartRequest, ObjectSpec, SideArtifact, TransferSource, UploadRequest};
pub use progress::{ProgressBarObserver, ProgressCounter, ProgressObserver, progress_fn};
pub use recorder::{MemoryRecorder, NoopRecorder, Recorder};
pub use service::{TransferService, TransferServiceBuilder};

#[cfg(feature = "s3")]
pub use s3_store::S3Backend;
