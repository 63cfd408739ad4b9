// src/backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Pluggable storage-backend abstraction.
// Every adapter supplies the required primitives (put/get/delete/head) plus a
// capability table; optional primitives default to `Unsupported` so the
// orchestrator can treat all backends uniformly.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use crate::acl::{self, Acl};
use crate::capability::{Capability, CapabilityDescriptor};
use crate::config::BackendSettings;
use crate::descriptor::PartDescriptor;
use crate::error::BackendError;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Attributes applied when an object (or a multipart session) is created.
/// `acl` is already translated into the backend's own spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
    pub acl: Option<String>,
}

/// What `head_object` learns about a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
}

/// A page of parts for an open session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartListing {
    pub parts: Vec<PartDescriptor>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: u32,
}

/// One file entry of a directory listing; `name` is relative to the listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub stat: ObjectStat,
}

/// A page of one directory level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub dirs: Vec<String>,
    pub files: Vec<ObjectEntry>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// What a presigned URL grants.
///
/// `headers` are request headers the holder must send unchanged (for a PUT,
/// typically `content-type` and `x-amz-meta-*`). `response_headers` override
/// headers of a GET response, e.g. `content-disposition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub method: HttpMethod,
    pub expires_in: Duration,
    pub headers: BTreeMap<String, String>,
    pub response_headers: BTreeMap<String, String>,
}

impl PresignRequest {
    pub fn new(method: HttpMethod, expires_in: Duration) -> Self {
        Self {
            method,
            expires_in,
            headers: BTreeMap::new(),
            response_headers: BTreeMap::new(),
        }
    }

    pub fn get(expires_in: Duration) -> Self {
        Self::new(HttpMethod::Get, expires_in)
    }

    pub fn put(expires_in: Duration) -> Self {
        Self::new(HttpMethod::Put, expires_in)
    }

    pub fn delete(expires_in: Duration) -> Self {
        Self::new(HttpMethod::Delete, expires_in)
    }

    /// Header names are stored lowercase.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

/// StorageBackend trait for pluggable storage backends.
///
/// Keys are the full `base_path + path + filename` string. `delete_object`
/// must succeed on missing keys. Optional operations return
/// `BackendError::Unsupported` unless the adapter overrides them, and an
/// adapter overriding one should declare it in `capabilities()`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn settings(&self) -> &BackendSettings;

    fn capabilities(&self) -> &CapabilityDescriptor;

    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Backend-specific ACL values accepted in addition to the portable tokens.
    fn native_acls(&self) -> &[&'static str] {
        &[]
    }

    /// Normalize a requested ACL. `None` means the value is not recognized.
    fn translate_acl(&self, acl: &Acl) -> Option<String> {
        acl::translate(acl, self.native_acls())
    }

    /// Store an object in one call, replacing any previous content.
    async fn put_object(&self, key: &str, data: Bytes, opts: &PutOptions) -> BackendResult<()>;

    /// Fetch an entire object. Missing keys yield `BackendError::NotFound`.
    async fn get_object(&self, key: &str) -> BackendResult<Bytes>;

    async fn delete_object(&self, key: &str) -> BackendResult<()>;

    async fn head_object(&self, key: &str) -> BackendResult<Option<ObjectStat>>;

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.head_object(key).await?.is_some())
    }

    /// Server-side copy within this backend.
    async fn copy_object(&self, _src: &str, _dst: &str, _opts: &PutOptions) -> BackendResult<()> {
        Err(BackendError::Unsupported(Capability::SameCopy))
    }

    /// Native rename within this backend.
    async fn rename_object(&self, _src: &str, _dst: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported(Capability::SameMove))
    }

    /// Open a multipart session and return its id.
    async fn create_multipart(&self, _key: &str, _opts: &PutOptions) -> BackendResult<String> {
        Err(BackendError::Unsupported(Capability::MultipartUpload))
    }

    /// Upload one part and return its ETag.
    async fn upload_part(
        &self,
        _key: &str,
        _upload_id: &str,
        _part_number: u32,
        _data: Bytes,
    ) -> BackendResult<String> {
        Err(BackendError::Unsupported(Capability::MultipartUpload))
    }

    /// Copy a byte range of `src` into a part of `dst`'s session, returning the ETag.
    async fn upload_part_copy(
        &self,
        _src: &str,
        _dst: &str,
        _upload_id: &str,
        _part_number: u32,
        _range: Range<u64>,
    ) -> BackendResult<String> {
        Err(BackendError::Unsupported(Capability::PartCopy))
    }

    /// Merge the given parts, in the given order, into the final object.
    async fn complete_multipart(
        &self,
        _key: &str,
        _upload_id: &str,
        _parts: &[PartDescriptor],
    ) -> BackendResult<()> {
        Err(BackendError::Unsupported(Capability::MultipartUpload))
    }

    async fn abort_multipart(&self, _key: &str, _upload_id: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported(Capability::MultipartUpload))
    }

    async fn list_parts(
        &self,
        _key: &str,
        _upload_id: &str,
        _max_parts: u32,
        _part_number_marker: Option<u32>,
    ) -> BackendResult<PartListing> {
        Err(BackendError::Unsupported(Capability::ListParts))
    }

    /// List one directory level under `dir`. Entries whose name starts with
    /// `prefix` and sorts after `marker` are returned, at most `max_files` files.
    async fn list_objects(
        &self,
        _dir: &str,
        _prefix: &str,
        _marker: Option<&str>,
        _max_files: usize,
    ) -> BackendResult<ObjectListing> {
        Err(BackendError::Unsupported(Capability::Listing))
    }

    async fn presigned_url(&self, _key: &str, _request: &PresignRequest) -> BackendResult<String> {
        Err(BackendError::Unsupported(Capability::PresignedUrl))
    }

    async fn set_object_acl(&self, _key: &str, _acl: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported(Capability::Acl))
    }
}

/// Once-only initializer for an adapter's native client.
///
/// Concurrent first callers wait on the same initialization; exactly one
/// client is built. A failed initialization leaves the cell empty so a later
/// call can try again.
#[derive(Debug)]
pub struct LazyClient<T> {
    cell: OnceCell<T>,
}

impl<T> LazyClient<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> std::result::Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.cell.get_or_try_init(init).await
    }

    /// Already initialised with `value`.
    pub fn with_value(value: T) -> Self {
        Self {
            cell: OnceCell::new_with(Some(value)),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

impl<T> Default for LazyClient<T> {
    fn default() -> Self {
        Self::new()
    }
}
