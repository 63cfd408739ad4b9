// src/constants.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Centralized constants for transferkit to avoid hardcoded values throughout the codebase

/// Default multipart upload threshold (128 MiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 128 * 1024 * 1024;

/// Default multipart upload part size (32 MiB)
pub const DEFAULT_MULTIPART_PART_SIZE: u64 = 32 * 1024 * 1024;

/// Default size at which a same-backend copy switches to part-by-part range copy (1 GiB)
pub const DEFAULT_COPY_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Default range size for each part of a chunked copy (256 MiB)
pub const DEFAULT_COPY_PART_SIZE: u64 = 256 * 1024 * 1024;

/// Maximum number of parts in an S3 multipart upload
pub const MAX_MULTIPART_PARTS: u32 = 10000;

/// Minimum S3 multipart upload part size (5 MB - AWS requirement)
pub const MIN_S3_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Buffer size for streaming reads from a caller-supplied source (1 MB)
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Suffix appended to the primary filename to name its side artifact
pub const DEFAULT_SIDE_ARTIFACT_SUFFIX: &str = ".min.jpg";

/// Default page size for `list_files`
pub const DEFAULT_MAX_LIST_FILES: usize = 1000;

/// Default page size for `list_parts`
pub const DEFAULT_MAX_LIST_PARTS: u32 = 1000;

/// Name of the backend used when a request does not name one
pub const DEFAULT_BACKEND_NAME: &str = "local";

/// Staging directory used by the filesystem backend for multipart sessions
pub const FILE_MULTIPART_STAGING_DIR: &str = ".multipart";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "TRANSFERKIT_";

/// Portable ACL tokens every ACL-capable backend must accept
pub const ACL_PRIVATE: &str = "private";
pub const ACL_PUBLIC_READ: &str = "public-read";
pub const ACL_PUBLIC_READ_WRITE: &str = "public-read-write";

/// S3 canned ACLs beyond the portable set
pub const S3_NATIVE_ACLS: &[&str] = &[
    "authenticated-read",
    "aws-exec-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
    "log-delivery-write",
];
