// src/pretreatment.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Request builders that gather everything a single transfer needs before it
//! starts: source bytes, target location, attributes, side artifact and an
//! optional progress observer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::acl::Acl;
use crate::backend::StorageBackend;
use crate::config::TransferConfig;
use crate::descriptor::{TransferDescriptor, UploadStatus, extension_of, new_object_id};
use crate::hash::HashAlgorithm;
use crate::progress::ProgressObserver;

/// Target location and attributes shared by every request that creates an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSpec {
    pub backend: Option<String>,
    pub path: String,
    pub save_filename: Option<String>,
    pub original_filename: Option<String>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
    pub acl: Option<Acl>,
    /// Per-request override of `TransferConfig::strict_capabilities`.
    pub strict: Option<bool>,
    pub object_id: Option<String>,
    pub object_type: Option<String>,
    pub attrs: BTreeMap<String, String>,
}

macro_rules! object_spec_setters {
    () => {
        pub fn backend(mut self, backend: impl Into<String>) -> Self {
            self.spec.backend = Some(backend.into());
            self
        }

        /// Directory under the backend base path; a trailing `/` is added if missing.
        pub fn path(mut self, path: impl Into<String>) -> Self {
            self.spec.path = path.into();
            self
        }

        pub fn save_filename(mut self, filename: impl Into<String>) -> Self {
            self.spec.save_filename = Some(filename.into());
            self
        }

        pub fn original_filename(mut self, filename: impl Into<String>) -> Self {
            self.spec.original_filename = Some(filename.into());
            self
        }

        pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
            self.spec.content_type = Some(content_type.into());
            self
        }

        pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.spec.metadata.insert(key.into(), value.into());
            self
        }

        pub fn user_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.spec.user_metadata.insert(key.into(), value.into());
            self
        }

        pub fn acl(mut self, acl: impl Into<Acl>) -> Self {
            self.spec.acl = Some(acl.into());
            self
        }

        pub fn strict(mut self, strict: bool) -> Self {
            self.spec.strict = Some(strict);
            self
        }

        /// Drop unsupported attributes with a warning instead of failing.
        pub fn best_effort(self) -> Self {
            self.strict(false)
        }

        pub fn object_id(mut self, id: impl Into<String>) -> Self {
            self.spec.object_id = Some(id.into());
            self
        }

        pub fn object_type(mut self, object_type: impl Into<String>) -> Self {
            self.spec.object_type = Some(object_type.into());
            self
        }

        pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.spec.attrs.insert(key.into(), value.into());
            self
        }

        pub fn spec(&self) -> &ObjectSpec {
            &self.spec
        }
    };
}

/// Where the primary bytes come from.
pub enum TransferSource {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    File(PathBuf),
}

impl fmt::Debug for TransferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            TransferSource::Reader(_) => f.write_str("Reader(..)"),
            TransferSource::File(p) => f.debug_tuple("File").field(p).finish(),
        }
    }
}

/// Secondary object stored next to the primary, e.g. a thumbnail.
#[derive(Debug, Clone, Default)]
pub struct SideArtifact {
    pub data: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
    pub acl: Option<Acl>,
}

/// A single save request.
pub struct UploadRequest {
    pub(crate) spec: ObjectSpec,
    pub(crate) source: TransferSource,
    pub(crate) size: Option<u64>,
    pub(crate) side_artifact: Option<SideArtifact>,
    pub(crate) hashes: Vec<HashAlgorithm>,
    pub(crate) observer: Option<Arc<dyn ProgressObserver>>,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("spec", &self.spec)
            .field("source", &self.source)
            .field("size", &self.size)
            .field("side_artifact", &self.side_artifact.as_ref().map(|s| s.data.len()))
            .field("hashes", &self.hashes)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl UploadRequest {
    fn with_source(source: TransferSource, size: Option<u64>) -> Self {
        Self {
            spec: ObjectSpec::default(),
            source,
            size,
            side_artifact: None,
            hashes: Vec::new(),
            observer: None,
        }
    }

    /// In-memory content; the size is known.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = Some(data.len() as u64);
        Self::with_source(TransferSource::Bytes(data), size)
    }

    /// Streamed content; pass `None` when the length is not known in advance.
    pub fn from_reader<R>(reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_source(TransferSource::Reader(Box::new(reader)), size)
    }

    /// A local file; its size is read when the transfer starts.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let original = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let mut req = Self::with_source(TransferSource::File(path), None);
        req.spec.original_filename = original;
        req
    }

    object_spec_setters!();

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Compute `algorithm` over the primary bytes into `TransferDescriptor::hash`.
    /// CRC-32 is always included.
    pub fn hash(mut self, algorithm: HashAlgorithm) -> Self {
        if !self.hashes.contains(&algorithm) {
            self.hashes.push(algorithm);
        }
        self
    }

    pub fn side_artifact(mut self, data: impl Into<Bytes>) -> Self {
        self.side_artifact_mut().data = data.into();
        self
    }

    pub fn side_artifact_filename(mut self, filename: impl Into<String>) -> Self {
        self.side_artifact_mut().filename = Some(filename.into());
        self
    }

    pub fn side_artifact_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.side_artifact_mut().content_type = Some(content_type.into());
        self
    }

    pub fn side_artifact_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.side_artifact_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn side_artifact_user_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.side_artifact_mut().user_metadata.insert(key.into(), value.into());
        self
    }

    pub fn side_artifact_acl(mut self, acl: impl Into<Acl>) -> Self {
        self.side_artifact_mut().acl = Some(acl.into());
        self
    }

    fn side_artifact_mut(&mut self) -> &mut SideArtifact {
        self.side_artifact.get_or_insert_with(SideArtifact::default)
    }
}

/// Opens a caller-driven multipart session.
#[derive(Debug, Clone, Default)]
pub struct InitiateMultipartRequest {
    pub(crate) spec: ObjectSpec,
    pub(crate) size: Option<u64>,
}

impl InitiateMultipartRequest {
    pub fn new() -> Self {
        Self::default()
    }

    object_spec_setters!();

    /// Expected final size, if known.
    pub fn expected_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Normalize a directory path: empty stays empty, otherwise it ends with `/`.
pub(crate) fn normalize_dir(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Fresh descriptor for `spec` on `backend`, with filename, URL and
/// identity assigned. Attributes are copied verbatim; capability
/// negotiation happens afterwards.
pub(crate) fn build_descriptor(
    spec: &ObjectSpec,
    backend: &dyn StorageBackend,
    size: Option<u64>,
) -> TransferDescriptor {
    let settings = backend.settings();
    let path = normalize_dir(&spec.path);

    let ext = spec
        .save_filename
        .as_deref()
        .and_then(extension_of)
        .or_else(|| spec.original_filename.as_deref().and_then(extension_of));
    let filename = match &spec.save_filename {
        Some(name) if !name.is_empty() => name.clone(),
        _ => match &ext {
            Some(ext) => format!("{}.{ext}", new_object_id()),
            None => new_object_id(),
        },
    };

    let mut desc = TransferDescriptor::new(backend.name(), &settings.base_path, &path, &filename);
    desc.original_filename = spec.original_filename.clone();
    desc.ext = ext;
    desc.size = size;
    desc.content_type = spec.content_type.clone();
    desc.metadata = spec.metadata.clone();
    desc.user_metadata = spec.user_metadata.clone();
    desc.acl = spec.acl.clone();
    desc.object_id = spec.object_id.clone();
    desc.object_type = spec.object_type.clone();
    desc.attrs = spec.attrs.clone();
    desc.upload_status = UploadStatus::Completed;
    desc
}

/// Fill the side-artifact fields of `desc` from `side`, defaulting the
/// filename to `<filename><suffix>`.
pub(crate) fn attach_side_artifact(desc: &mut TransferDescriptor, side: &SideArtifact, config: &TransferConfig) {
    let filename = match &side.filename {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("{}{}", desc.filename, config.side_artifact_suffix),
    };
    desc.side_artifact_filename = Some(filename);
    desc.side_artifact_size = Some(side.data.len() as u64);
    desc.side_artifact_content_type = side.content_type.clone();
    desc.side_artifact_metadata = side.metadata.clone();
    desc.side_artifact_user_metadata = side.user_metadata.clone();
    desc.side_artifact_acl = side.acl.clone();
}
