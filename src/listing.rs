// src/listing.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Directory listing types and the prefix/marker pagination shared by backends
//! that can only enumerate a whole directory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilesRequest {
    pub backend: Option<String>,
    /// Directory under the backend base path, e.g. `docs/`.
    pub path: String,
    pub filename_prefix: String,
    pub marker: Option<String>,
    pub max_files: Option<usize>,
}

impl ListFilesRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    pub backend: String,
    pub base_path: String,
    pub path: String,
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub ext: Option<String>,
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub user_metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDirInfo {
    pub backend: String,
    pub base_path: String,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesResult {
    pub dirs: Vec<RemoteDirInfo>,
    pub files: Vec<RemoteFileInfo>,
    pub backend: String,
    pub base_path: String,
    pub path: String,
    pub filename_prefix: String,
    pub marker: Option<String>,
    pub max_files: usize,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// One page cut out of a full directory enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// Keep entries whose name starts with `prefix` and sorts strictly after
/// `marker`, ordered by name, at most `max` of them (0 = no limit).
pub fn match_listing<T, F>(items: Vec<T>, name: F, prefix: &str, marker: Option<&str>, max: usize) -> Page<T>
where
    F: Fn(&T) -> &str,
{
    let mut matched: Vec<T> = items
        .into_iter()
        .filter(|item| name(item).starts_with(prefix))
        .filter(|item| marker.is_none_or(|m| name(item) > m))
        .collect();
    matched.sort_by(|a, b| name(a).cmp(name(b)));

    if max == 0 || matched.len() <= max {
        return Page {
            items: matched,
            is_truncated: false,
            next_marker: None,
        };
    }

    matched.truncate(max);
    let next_marker = matched.last().map(|item| name(item).to_string());
    Page {
        items: matched,
        is_truncated: true,
        next_marker,
    }
}
