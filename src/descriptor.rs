// src/descriptor.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Records describing stored objects and multipart parts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::hash::HashAlgorithm;

/// Where a transfer stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Bytes are fully stored.
    #[default]
    Completed,
    /// A caller-driven multipart session is open.
    Initiated,
    /// A caller-driven multipart session was aborted.
    Aborted,
}

/// Integrity info computed while the engine streamed the primary bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashInfo {
    /// CRC-32 of the content, lowercase hex.
    pub crc32: String,
    /// Additionally requested digests, lowercase hex.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digests: BTreeMap<HashAlgorithm, String>,
}

impl HashInfo {
    pub fn crc32_of(data: &[u8]) -> Self {
        Self::from_crc32(crc32fast::hash(data))
    }

    pub fn from_crc32(value: u32) -> Self {
        Self {
            crc32: format!("{value:08x}"),
            digests: BTreeMap::new(),
        }
    }

    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&str> {
        match algorithm {
            HashAlgorithm::Crc32 => Some(self.crc32.as_str()),
            other => self.digests.get(&other).map(String::as_str),
        }
    }
}

/// One logical object written through, or referenced by, the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub backend: String,
    pub base_path: String,
    pub path: String,
    pub filename: String,
    pub original_filename: Option<String>,
    pub ext: Option<String>,

    /// Byte length; filled in from the bytes actually sent when unknown up front.
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
    pub acl: Option<Acl>,
    pub hash: Option<HashInfo>,

    pub side_artifact_filename: Option<String>,
    pub side_artifact_url: Option<String>,
    pub side_artifact_size: Option<u64>,
    pub side_artifact_content_type: Option<String>,
    pub side_artifact_metadata: BTreeMap<String, String>,
    pub side_artifact_user_metadata: BTreeMap<String, String>,
    pub side_artifact_acl: Option<Acl>,

    /// Present only while a chunked session is open.
    pub upload_session_id: Option<String>,
    pub upload_status: UploadStatus,

    /// `domain + base_path + path + filename`, assigned before any byte moves.
    pub url: String,

    pub object_id: Option<String>,
    pub object_type: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl TransferDescriptor {
    pub fn new(backend: &str, base_path: &str, path: &str, filename: &str) -> Self {
        Self {
            backend: backend.to_string(),
            base_path: base_path.to_string(),
            path: path.to_string(),
            filename: filename.to_string(),
            original_filename: None,
            ext: None,
            size: None,
            content_type: None,
            metadata: BTreeMap::new(),
            user_metadata: BTreeMap::new(),
            acl: None,
            hash: None,
            side_artifact_filename: None,
            side_artifact_url: None,
            side_artifact_size: None,
            side_artifact_content_type: None,
            side_artifact_metadata: BTreeMap::new(),
            side_artifact_user_metadata: BTreeMap::new(),
            side_artifact_acl: None,
            upload_session_id: None,
            upload_status: UploadStatus::Completed,
            url: String::new(),
            object_id: None,
            object_type: None,
            attrs: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Backend key of the primary object.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.base_path, self.path, self.filename)
    }

    /// Backend key of the side artifact, if one exists.
    pub fn side_artifact_key(&self) -> Option<String> {
        self.side_artifact_filename
            .as_ref()
            .map(|f| format!("{}{}{}", self.base_path, self.path, f))
    }

    pub fn has_side_artifact(&self) -> bool {
        self.side_artifact_filename.is_some()
    }

    /// Compute `url` (and `side_artifact_url`) from the backend domain.
    pub fn assign_urls(&mut self, domain: &str) {
        self.url = format!("{domain}{}", self.key());
        self.side_artifact_url = self.side_artifact_key().map(|k| format!("{domain}{k}"));
    }

    /// Descriptor for a copy of `self` at a new location. Attributes carry over,
    /// session state does not.
    pub fn relocated(
        &self,
        backend: &str,
        base_path: &str,
        path: &str,
        filename: &str,
        side_artifact_filename: Option<&str>,
    ) -> Self {
        let mut dest = self.clone();
        dest.backend = backend.to_string();
        dest.base_path = base_path.to_string();
        dest.path = path.to_string();
        dest.filename = filename.to_string();
        dest.ext = extension_of(filename).or_else(|| self.ext.clone());
        dest.side_artifact_filename = side_artifact_filename.map(str::to_string);
        dest.side_artifact_url = None;
        dest.upload_session_id = None;
        dest.upload_status = UploadStatus::Completed;
        dest.url = String::new();
        dest.created_at = Utc::now();
        dest
    }
}

/// One chunk of a chunked upload or chunked copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    pub part_number: u32,
    pub e_tag: String,
    pub part_size: u64,
    pub upload_session_id: Option<String>,
    pub url: Option<String>,
    pub hash: Option<HashInfo>,
    pub created_at: DateTime<Utc>,
}

impl PartDescriptor {
    pub fn new(part_number: u32, e_tag: impl Into<String>, part_size: u64) -> Self {
        Self {
            part_number,
            e_tag: e_tag.into(),
            part_size,
            upload_session_id: None,
            url: None,
            hash: None,
            created_at: Utc::now(),
        }
    }
}

/// Random 32-hex-char identifier used for generated filenames.
pub fn new_object_id() -> String {
    let mut rng = rand::rng();
    let value: u128 = rng.random();
    format!("{value:032x}")
}

/// Extension after the last `.`, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_string()),
        _ => None,
    }
}
