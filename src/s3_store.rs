// src/s3_store.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! S3 adapter built on the AWS Rust SDK.
//!
//! The client is created on first use from the environment: `.env` (via
//! dotenvy), the default credential chain, `AWS_REGION` with the default
//! region chain, and `AWS_ENDPOINT_URL` for S3-compatible services. Path-style
//! addressing is always forced.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::ops::Range;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, trace};

use crate::backend::{
    BackendResult, HttpMethod, LazyClient, ObjectEntry, ObjectListing, ObjectStat, PartListing, PresignRequest,
    PutOptions, StorageBackend,
};
use crate::capability::CapabilityDescriptor;
use crate::config::BackendSettings;
use crate::constants::{DEFAULT_MAX_LIST_FILES, MAX_MULTIPART_PARTS, MIN_S3_MULTIPART_PART_SIZE, S3_NATIVE_ACLS};
use crate::descriptor::PartDescriptor;
use crate::error::BackendError;

pub const DEFAULT_REGION: &str = "us-east-1";

/// System headers settable through `PutOptions::metadata`, in canonical spelling.
const SYSTEM_HEADERS: [&str; 4] = ["Cache-Control", "Content-Disposition", "Content-Encoding", "Content-Language"];

/// Bytes escaped in `x-amz-copy-source`; `/` separates bucket and key segments.
const COPY_SOURCE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct S3Backend {
    bucket: String,
    settings: BackendSettings,
    capabilities: CapabilityDescriptor,
    client: LazyClient<Client>,
}

impl S3Backend {
    /// Adapter for `bucket`; the client is built lazily from the environment.
    pub fn new(bucket: impl Into<String>, settings: BackendSettings) -> Self {
        Self::with_client_cell(bucket.into(), settings, LazyClient::new())
    }

    /// Adapter using an already configured client.
    pub fn with_client(bucket: impl Into<String>, settings: BackendSettings, client: Client) -> Self {
        Self::with_client_cell(bucket.into(), settings, LazyClient::with_value(client))
    }

    fn with_client_cell(bucket: String, settings: BackendSettings, client: LazyClient<Client>) -> Self {
        let capabilities = CapabilityDescriptor {
            same_move: false,
            max_parts: MAX_MULTIPART_PARTS,
            max_list_entries: DEFAULT_MAX_LIST_FILES,
            min_part_size: MIN_S3_MULTIPART_PART_SIZE,
            ..CapabilityDescriptor::full()
        };
        Self {
            bucket,
            settings,
            capabilities,
            client,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn client(&self) -> BackendResult<&Client> {
        self.client.get_or_try_init(build_client).await
    }

    fn copy_source(&self, key: &str) -> String {
        copy_source(&self.bucket, key)
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_ESCAPE))
}

/// Key a listing resumes after. A directory marker (`sub/`) skips the whole
/// subtree, since S3 would otherwise roll its keys up into the same prefix again.
fn start_after(dir: &str, marker: &str) -> String {
    if marker.ends_with('/') {
        format!("{dir}{marker}{}", char::MAX)
    } else {
        format!("{dir}{marker}")
    }
}

/// Greatest entry of a page in S3 key order. Directories are spelled `name/`.
fn page_marker(dirs: &[String], files: &[ObjectEntry]) -> Option<String> {
    let last_dir = dirs.last().map(|d| format!("{d}/"));
    let last_file = files.last().map(|f| f.name.clone());
    last_dir.into_iter().chain(last_file).max()
}

fn unsigned_header(name: &str) -> BackendError {
    BackendError::Other(anyhow!("header `{name}` cannot be presigned"))
}

async fn build_client() -> BackendResult<Client> {
    dotenvy::dotenv().ok();

    let region = RegionProviderChain::first_try(env::var("AWS_REGION").ok().map(Region::new))
        .or_default_provider()
        .or_else(Region::new(DEFAULT_REGION));

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
    if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
        if !endpoint.is_empty() {
            loader = loader.endpoint_url(endpoint);
        }
    }
    let cfg = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&cfg).force_path_style(true).build();
    debug!("S3 client initialised");
    Ok(Client::from_conf(s3_config))
}

/// Normalise an SDK error: missing keys and sessions get their own variants,
/// everything else keeps the SDK's full error context.
fn sdk_error<E>(err: SdkError<E>, key: &str, upload_id: Option<&str>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    let status = err.raw_response().map(|r| r.status().as_u16());
    match (code.as_deref(), status, upload_id) {
        (Some("NoSuchUpload"), _, Some(id)) => BackendError::NoSuchSession(id.to_string()),
        (Some("NoSuchKey" | "NotFound"), _, _) | (None, Some(404), None) => BackendError::NotFound(key.to_string()),
        (_, Some(404), Some(id)) => BackendError::NoSuchSession(id.to_string()),
        _ => BackendError::Other(anyhow!("{}", DisplayErrorContext(&err))),
    }
}

fn system_header(metadata: &BTreeMap<String, String>, name: &str) -> Option<String> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

fn user_metadata(metadata: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    if metadata.is_empty() {
        None
    } else {
        Some(metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn to_chrono(dt: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Apply content type, system headers, user metadata and canned ACL to any
/// request builder that accepts them.
macro_rules! with_put_options {
    ($req:expr, $opts:expr) => {{
        let opts: &PutOptions = $opts;
        $req.set_content_type(opts.content_type.clone())
            .set_cache_control(system_header(&opts.metadata, SYSTEM_HEADERS[0]))
            .set_content_disposition(system_header(&opts.metadata, SYSTEM_HEADERS[1]))
            .set_content_encoding(system_header(&opts.metadata, SYSTEM_HEADERS[2]))
            .set_content_language(system_header(&opts.metadata, SYSTEM_HEADERS[3]))
            .set_metadata(user_metadata(&opts.user_metadata))
            .set_acl(opts.acl.as_deref().map(ObjectCannedAcl::from))
    }};
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    fn native_acls(&self) -> &[&'static str] {
        S3_NATIVE_ACLS
    }

    async fn put_object(&self, key: &str, data: Bytes, opts: &PutOptions) -> BackendResult<()> {
        let client = self.client().await?;
        trace!(bucket = %self.bucket, key, len = data.len(), "put_object");
        let req = client.put_object().bucket(&self.bucket).key(key).body(ByteStream::from(data));
        with_put_options!(req, opts)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, None))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        let client = self.client().await?;
        let resp = client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, None))?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Other(anyhow!("reading body of `{key}`: {e}")))?;
        Ok(body.into_bytes())
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        let client = self.client().await?;
        client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, None))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> BackendResult<Option<ObjectStat>> {
        let client = self.client().await?;
        let resp = match client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return match sdk_error(e, key, None) {
                    BackendError::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let mut metadata = BTreeMap::new();
        let headers = [
            resp.cache_control(),
            resp.content_disposition(),
            resp.content_encoding(),
            resp.content_language(),
        ];
        for (name, value) in SYSTEM_HEADERS.iter().zip(headers) {
            if let Some(value) = value {
                metadata.insert(name.to_string(), value.to_string());
            }
        }
        Ok(Some(ObjectStat {
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            e_tag: resp.e_tag().map(|t| t.trim_matches('"').to_string()),
            content_type: resp.content_type().map(str::to_string),
            last_modified: resp.last_modified().and_then(to_chrono),
            metadata,
            user_metadata: resp
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }))
    }

    async fn copy_object(&self, src: &str, dst: &str, opts: &PutOptions) -> BackendResult<()> {
        let client = self.client().await?;
        let replace = opts.content_type.is_some() || !opts.metadata.is_empty() || !opts.user_metadata.is_empty();
        let directive = if replace { MetadataDirective::Replace } else { MetadataDirective::Copy };
        let req = client
            .copy_object()
            .bucket(&self.bucket)
            .key(dst)
            .copy_source(self.copy_source(src))
            .metadata_directive(directive);
        with_put_options!(req, opts)
            .send()
            .await
            .map_err(|e| sdk_error(e, src, None))?;
        debug!(bucket = %self.bucket, src, dst, "copy_object");
        Ok(())
    }

    async fn create_multipart(&self, key: &str, opts: &PutOptions) -> BackendResult<String> {
        let client = self.client().await?;
        let req = client.create_multipart_upload().bucket(&self.bucket).key(key);
        let resp = with_put_options!(req, opts)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, None))?;
        resp.upload_id()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other(anyhow!("no upload id returned for `{key}`")))
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> BackendResult<String> {
        let client = self.client().await?;
        let resp = client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error(e, key, Some(upload_id)))?;
        resp.e_tag()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other(anyhow!("no ETag returned for part {part_number} of `{key}`")))
    }

    async fn upload_part_copy(
        &self,
        src: &str,
        dst: &str,
        upload_id: &str,
        part_number: u32,
        range: Range<u64>,
    ) -> BackendResult<String> {
        if range.start >= range.end {
            return Err(BackendError::Other(anyhow!("empty copy range for part {part_number}")));
        }
        let client = self.client().await?;
        let resp = client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(dst)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .copy_source(self.copy_source(src))
            .copy_source_range(format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(|e| sdk_error(e, src, Some(upload_id)))?;
        resp.copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other(anyhow!("no ETag returned for copied part {part_number}")))
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[PartDescriptor]) -> BackendResult<()> {
        let client = self.client().await?;
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number as i32)
                            .e_tag(&p.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, Some(upload_id)))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> BackendResult<()> {
        let client = self.client().await?;
        client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error(e, key, Some(upload_id)))?;
        Ok(())
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: Option<u32>,
    ) -> BackendResult<PartListing> {
        let client = self.client().await?;
        let resp = client
            .list_parts()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .max_parts(max_parts.min(i32::MAX as u32) as i32)
            .set_part_number_marker(part_number_marker.map(|m| m.to_string()))
            .send()
            .await
            .map_err(|e| sdk_error(e, key, Some(upload_id)))?;

        let parts = resp
            .parts()
            .iter()
            .filter_map(|p| {
                let number = u32::try_from(p.part_number()?).ok()?;
                let mut part = PartDescriptor::new(
                    number,
                    p.e_tag().unwrap_or_default(),
                    p.size().unwrap_or(0).max(0) as u64,
                );
                part.upload_session_id = Some(upload_id.to_string());
                if let Some(ts) = p.last_modified().and_then(to_chrono) {
                    part.created_at = ts;
                }
                Some(part)
            })
            .collect();
        Ok(PartListing {
            parts,
            is_truncated: resp.is_truncated().unwrap_or(false),
            next_part_number_marker: resp.next_part_number_marker().and_then(|m| m.parse().ok()),
            max_parts,
        })
    }

    async fn list_objects(
        &self,
        dir: &str,
        prefix: &str,
        marker: Option<&str>,
        max_files: usize,
    ) -> BackendResult<ObjectListing> {
        let client = self.client().await?;
        let max_keys = if max_files == 0 { DEFAULT_MAX_LIST_FILES } else { max_files };
        let resp = client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{dir}{prefix}"))
            .delimiter("/")
            .set_start_after(marker.map(|m| start_after(dir, m)))
            .max_keys(max_keys.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(|e| sdk_error(e, dir, None))?;

        let dirs: Vec<String> = resp
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .filter_map(|p| p.strip_prefix(dir))
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let files: Vec<ObjectEntry> = resp
            .contents()
            .iter()
            .filter_map(|o| {
                let name = o.key()?.strip_prefix(dir)?;
                if name.is_empty() {
                    return None;
                }
                Some(ObjectEntry {
                    name: name.to_string(),
                    stat: ObjectStat {
                        size: o.size().unwrap_or(0).max(0) as u64,
                        e_tag: o.e_tag().map(|t| t.trim_matches('"').to_string()),
                        last_modified: o.last_modified().and_then(to_chrono),
                        ..ObjectStat::default()
                    },
                })
            })
            .collect();

        let is_truncated = resp.is_truncated().unwrap_or(false);
        let next_marker = if is_truncated { page_marker(&dirs, &files) } else { None };
        Ok(ObjectListing {
            dirs,
            files,
            is_truncated,
            next_marker,
        })
    }

    async fn presigned_url(&self, key: &str, request: &PresignRequest) -> BackendResult<String> {
        let client = self.client().await?;
        let presigning = PresigningConfig::expires_in(request.expires_in)
            .map_err(|e| BackendError::Other(anyhow!("invalid presign expiry: {e}")))?;
        let presigned = match request.method {
            HttpMethod::Get => {
                let mut op = client.get_object().bucket(&self.bucket).key(key);
                for (name, value) in &request.response_headers {
                    op = match name.as_str() {
                        "content-type" => op.response_content_type(value),
                        "content-disposition" => op.response_content_disposition(value),
                        "content-encoding" => op.response_content_encoding(value),
                        "content-language" => op.response_content_language(value),
                        "cache-control" => op.response_cache_control(value),
                        other => return Err(unsigned_header(other)),
                    };
                }
                op.presigned(presigning).await.map_err(|e| sdk_error(e, key, None))?
            }
            HttpMethod::Put => {
                let mut op = client.put_object().bucket(&self.bucket).key(key);
                for (name, value) in &request.headers {
                    op = match name.as_str() {
                        "content-type" => op.content_type(value),
                        "content-disposition" => op.content_disposition(value),
                        "content-encoding" => op.content_encoding(value),
                        "cache-control" => op.cache_control(value),
                        "x-amz-acl" => op.acl(ObjectCannedAcl::from(value.as_str())),
                        other => match other.strip_prefix("x-amz-meta-") {
                            Some(meta) => op.metadata(meta, value),
                            None => return Err(unsigned_header(other)),
                        },
                    };
                }
                op.presigned(presigning).await.map_err(|e| sdk_error(e, key, None))?
            }
            HttpMethod::Delete => client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| sdk_error(e, key, None))?,
        };
        Ok(presigned.uri().to_string())
    }

    async fn set_object_acl(&self, key: &str, acl: &str) -> BackendResult<()> {
        let client = self.client().await?;
        client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|e| sdk_error(e, key, None))?;
        Ok(())
    }
}
