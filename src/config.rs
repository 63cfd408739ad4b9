// src/config.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Runtime parameters for the engine and per-backend settings.
//!
//! Defaults come from [`crate::constants`]. `from_env()` loads a `.env` file
//! (if any) and applies `TRANSFERKIT_*` overrides on top.

use anyhow::{Context, Result, bail};

use crate::acl::Acl;
use crate::constants::{
    DEFAULT_BACKEND_NAME, DEFAULT_COPY_PART_SIZE, DEFAULT_COPY_THRESHOLD, DEFAULT_MAX_LIST_FILES,
    DEFAULT_MULTIPART_PART_SIZE, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_SIDE_ARTIFACT_SUFFIX,
    ENV_PREFIX,
};

/// Engine-wide transfer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Backend used when a request names none.
    pub default_backend: String,
    /// Sizes at or above this (or unknown) use a chunked session.
    pub multipart_threshold: u64,
    /// Size of every chunk except the final one.
    pub part_size: u64,
    /// Same-backend copies at or above this size use range copy.
    pub copy_threshold: u64,
    pub copy_part_size: u64,
    /// Fail requests using unsupported capabilities instead of dropping the attribute.
    pub strict_capabilities: bool,
    pub side_artifact_suffix: String,
    pub max_list_files: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_backend: DEFAULT_BACKEND_NAME.to_string(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_MULTIPART_PART_SIZE,
            copy_threshold: DEFAULT_COPY_THRESHOLD,
            copy_part_size: DEFAULT_COPY_PART_SIZE,
            strict_capabilities: true,
            side_artifact_suffix: DEFAULT_SIDE_ARTIFACT_SUFFIX.to_string(),
            max_list_files: DEFAULT_MAX_LIST_FILES,
        }
    }
}

impl TransferConfig {
    /// Defaults overridden by `.env` and process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `TRANSFERKIT_*` name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut cfg = Self::default();

        if let Some(v) = var("DEFAULT_BACKEND") {
            cfg.default_backend = v;
        }
        if let Some(v) = var("MULTIPART_THRESHOLD") {
            cfg.multipart_threshold = parse_u64("MULTIPART_THRESHOLD", &v)?;
        }
        if let Some(v) = var("PART_SIZE") {
            cfg.part_size = parse_u64("PART_SIZE", &v)?;
        }
        if let Some(v) = var("COPY_THRESHOLD") {
            cfg.copy_threshold = parse_u64("COPY_THRESHOLD", &v)?;
        }
        if let Some(v) = var("COPY_PART_SIZE") {
            cfg.copy_part_size = parse_u64("COPY_PART_SIZE", &v)?;
        }
        if let Some(v) = var("STRICT") {
            cfg.strict_capabilities = parse_bool("STRICT", &v)?;
        }
        if let Some(v) = var("SIDE_ARTIFACT_SUFFIX") {
            cfg.side_artifact_suffix = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            bail!("part_size must be greater than zero");
        }
        if self.copy_part_size == 0 {
            bail!("copy_part_size must be greater than zero");
        }
        if self.default_backend.is_empty() {
            bail!("default_backend must not be empty");
        }
        Ok(())
    }
}

/// Settings an adapter is constructed with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendSettings {
    /// Name the backend is registered and addressed under.
    pub name: String,
    /// Prefix for externally resolvable URLs, e.g. `https://cdn.example.com/`.
    pub domain: String,
    /// Key prefix every object on this backend lives under.
    pub base_path: String,
    /// ACL applied when a request carries none.
    pub default_acl: Option<Acl>,
    pub multipart_threshold: Option<u64>,
    pub part_size: Option<u64>,
}

impl BackendSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Prefix record URLs start with. Falls back to `<name>://` so records of
    /// two backends never share a URL when neither sets a domain.
    pub fn url_domain(&self) -> String {
        if self.domain.is_empty() {
            format!("{}://", self.name)
        } else {
            self.domain.clone()
        }
    }

    /// Whether record URLs of `self` and `other` can collide.
    pub fn overlaps(&self, other: &BackendSettings) -> bool {
        self.url_domain() == other.url_domain()
            && (self.base_path.starts_with(&other.base_path) || other.base_path.starts_with(&self.base_path))
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_default_acl(mut self, acl: Acl) -> Self {
        self.default_acl = Some(acl);
        self
    }

    pub fn with_multipart(mut self, threshold: u64, part_size: u64) -> Self {
        self.multipart_threshold = Some(threshold);
        self.part_size = Some(part_size);
        self
    }

    /// Backend settings from `TRANSFERKIT_<NAME>_DOMAIN`, `_BASE_PATH`,
    /// `_DEFAULT_ACL`, `_MULTIPART_THRESHOLD` and `_PART_SIZE`.
    pub fn from_lookup<F>(name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upper = name.to_ascii_uppercase().replace('-', "_");
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{upper}_{suffix}"));
        let mut settings = Self::new(name);
        if let Some(v) = var("DOMAIN") {
            settings.domain = v;
        }
        if let Some(v) = var("BASE_PATH") {
            settings.base_path = v;
        }
        settings.default_acl = var("DEFAULT_ACL").filter(|v| !v.trim().is_empty()).map(Acl::from);
        if let Some(v) = var("MULTIPART_THRESHOLD") {
            settings.multipart_threshold = Some(parse_u64("MULTIPART_THRESHOLD", &v)?);
        }
        if let Some(v) = var("PART_SIZE") {
            settings.part_size = Some(parse_u64("PART_SIZE", &v)?);
        }
        Ok(settings)
    }

    pub fn from_env(name: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(name, |k| std::env::var(k).ok())
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .replace('_', "")
        .parse::<u64>()
        .with_context(|| format!("{ENV_PREFIX}{name} must be a byte count, got `{value}`"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{ENV_PREFIX}{name} must be a boolean, got `{value}`"),
    }
}
