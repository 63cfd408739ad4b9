// src/bin/cli.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! `transferkit` command line, working against a local directory tree.
//!
//! Examples:
//! ```bash
//! transferkit --root /data put ./report.pdf --path docs
//! transferkit --root /data ls docs --prefix rep
//! transferkit --root /data get docs/report.pdf ./copy.pdf
//! transferkit --root /data cp docs/report.pdf archive/report.pdf
//! transferkit --root /data mv docs/report.pdf archive/2025/report.pdf
//! transferkit --root /data stat archive/2025/report.pdf
//! transferkit caps
//! ```

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use transferkit::{
    BackendSettings, Capability, CopyRequest, FileSystemBackend, HashAlgorithm, ListFilesRequest,
    ProgressBarObserver, TransferConfig, TransferDescriptor, TransferService, UploadRequest,
};

/// Print to stdout, exiting quietly when the pipe is closed.
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Directory the local backend keeps its objects under.
    #[arg(long, env = "TRANSFERKIT_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file.
    Put {
        file: PathBuf,
        /// Remote directory.
        #[arg(long, default_value = "")]
        path: String,
        /// Remote filename; a random id plus the file's extension when omitted.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Requested ACL; dropped with a warning where unsupported.
        #[arg(long)]
        acl: Option<String>,
        /// Part size in bytes for chunked uploads.
        #[arg(long)]
        part_size: Option<u64>,
        /// Files at or above this many bytes upload in parts.
        #[arg(long)]
        threshold: Option<u64>,
        /// Extra digest to compute (md5, sha1, sha256, sha384, sha512); repeatable.
        #[arg(long = "hash")]
        hashes: Vec<HashAlgorithm>,
    },

    /// Download `dir/file` into a local file.
    Get { remote: String, out: PathBuf },

    /// Delete `dir/file`.
    Rm { remote: String },

    /// Print what the backend knows about `dir/file` as JSON.
    Stat { remote: String },

    /// List one directory level.
    Ls {
        #[arg(default_value = "")]
        path: String,
        #[arg(long, default_value = "")]
        prefix: String,
        /// Resume after this filename.
        #[arg(long)]
        marker: Option<String>,
        #[arg(long)]
        max: Option<usize>,
    },

    /// Copy `dir/file` to `dir/file`.
    Cp { src: String, dst: String },

    /// Move `dir/file` to `dir/file`.
    Mv { src: String, dst: String },

    /// Show what each configured backend supports.
    Caps,
}

/// Split `a/b/c.txt` into (`a/b/`, `c.txt`).
fn split_remote(remote: &str) -> Result<(String, String)> {
    let trimmed = remote.trim_start_matches('/');
    let (dir, name) = match trimmed.rsplit_once('/') {
        Some((dir, name)) => (format!("{dir}/"), name),
        None => (String::new(), trimmed),
    };
    if name.is_empty() {
        bail!("`{remote}` does not name a file");
    }
    Ok((dir, name.to_string()))
}

/// Descriptor for `remote` on the default backend, without checking that it exists.
fn descriptor_for(service: &TransferService, remote: &str) -> Result<TransferDescriptor> {
    let (path, filename) = split_remote(remote)?;
    let backend = service.backend(None)?;
    let settings = backend.settings();
    let mut desc = TransferDescriptor::new(backend.name(), &settings.base_path, &path, &filename);
    desc.assign_urls(&settings.url_domain());
    Ok(desc)
}

/// Like `descriptor_for`, but fails when the object is missing.
async fn locate(service: &TransferService, remote: &str) -> Result<TransferDescriptor> {
    let mut desc = descriptor_for(service, remote)?;
    let info = service
        .get_file_metadata(None, &desc.path, &desc.filename)
        .await?
        .with_context(|| format!("`{remote}` not found"))?;
    desc.size = Some(info.size);
    desc.ext = info.ext;
    desc.content_type = info.content_type;
    Ok(desc)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = TransferConfig::from_env()?;
    if let Command::Put { part_size, threshold, .. } = &cli.cmd {
        if let Some(part_size) = part_size {
            config.part_size = *part_size;
        }
        if let Some(threshold) = threshold {
            config.multipart_threshold = *threshold;
        }
    }
    let settings = BackendSettings::from_env(&config.default_backend)?;
    info!(root = %cli.root.display(), backend = %settings.name, "using local backend");
    let backend = FileSystemBackend::new(&cli.root, settings);
    let service = TransferService::builder(config).backend(Arc::new(backend)).build()?;

    match cli.cmd {
        Command::Put {
            file,
            path,
            name,
            content_type,
            acl,
            hashes,
            ..
        } => {
            let len = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?
                .len();
            let bar = Arc::new(ProgressBarObserver::new("put", Some(len)));
            let mut request = UploadRequest::from_path(&file).path(path).progress(bar);
            if let Some(name) = name {
                request = request.save_filename(name);
            }
            if let Some(content_type) = content_type {
                request = request.content_type(content_type);
            }
            if let Some(acl) = acl {
                request = request.acl(acl).best_effort();
            }
            for algorithm in hashes {
                request = request.hash(algorithm);
            }
            let desc = service.upload(request).await?;
            safe_println!("{}\t{} bytes", desc.url, desc.size.unwrap_or(0));
            if let Some(hash) = &desc.hash {
                safe_println!("crc32\t{}", hash.crc32);
                for (algorithm, digest) in &hash.digests {
                    safe_println!("{algorithm}\t{digest}");
                }
            }
        }

        Command::Get { remote, out } => {
            let desc = locate(&service, &remote).await?;
            let mut file = tokio::fs::File::create(&out)
                .await
                .with_context(|| format!("cannot create {}", out.display()))?;
            let written = service.download_to(&desc, &mut file).await?;
            safe_println!("{} -> {} ({written} bytes)", desc.url, out.display());
        }

        Command::Rm { remote } => {
            let desc = descriptor_for(&service, &remote)?;
            service.delete(&desc).await?;
            safe_println!("deleted {}", desc.url);
        }

        Command::Stat { remote } => {
            let (path, filename) = split_remote(&remote)?;
            let info = service
                .get_file_metadata(None, &path, &filename)
                .await?
                .with_context(|| format!("`{remote}` not found"))?;
            safe_println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Ls {
            path,
            prefix,
            marker,
            max,
        } => {
            let mut request = ListFilesRequest::new(path).filename_prefix(prefix);
            if let Some(marker) = marker {
                request = request.marker(marker);
            }
            if let Some(max) = max {
                request = request.max_files(max);
            }
            let Some(listing) = service.list_files(request).await? else {
                bail!("backend `{}` cannot list directories", service.default_backend());
            };
            for dir in &listing.dirs {
                safe_println!("{:>12}  {}/", "DIR", dir.name);
            }
            for file in &listing.files {
                safe_println!("{:>12}  {}", file.size, file.filename);
            }
            if let Some(next) = listing.next_marker.filter(|_| listing.is_truncated) {
                eprintln!("more entries follow; continue with --marker {next}");
            }
        }

        Command::Cp { src, dst } => {
            let source = locate(&service, &src).await?;
            let (path, filename) = split_remote(&dst)?;
            let bar = Arc::new(ProgressBarObserver::new("cp", source.size));
            let request = CopyRequest::new().path(path).filename(filename).progress(bar);
            let dest = service.copy_file(&source, request).await?;
            safe_println!("{} -> {}", source.url, dest.url);
        }

        Command::Mv { src, dst } => {
            let source = locate(&service, &src).await?;
            let (path, filename) = split_remote(&dst)?;
            let bar = Arc::new(ProgressBarObserver::new("mv", source.size));
            let request = CopyRequest::new().path(path).filename(filename).progress(bar);
            let dest = service.move_file(&source, request).await?;
            safe_println!("{} -> {}", source.url, dest.url);
        }

        Command::Caps => {
            for name in service.backend_names() {
                let caps = service.capabilities(Some(name))?;
                safe_println!("{name}:");
                for capability in Capability::ALL {
                    let state = if caps.supports(capability) { "yes" } else { "no" };
                    safe_println!("  {:<18} {state}", capability.to_string());
                }
                safe_println!("  {:<18} {}", "max-parts", caps.max_parts);
                safe_println!("  {:<18} {}", "min-part-size", caps.min_part_size);
            }
        }
    }

    Ok(())
}
