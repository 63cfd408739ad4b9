// tests/test_file_store.rs
//
// FileSystemBackend against a temp directory, directly and through the service.

mod common;

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tempfile::TempDir;
use transferkit::{
    BackendSettings, Capability, CopyMode, CopyRequest, FileSystemBackend, ListFilesRequest, MemoryBackend,
    MemoryRecorder, MoveRequest, PutOptions, StorageBackend, TransferConfig, TransferError, TransferService,
    UploadRequest,
};

use common::{payload, print_test_header};

fn local(root: &TempDir) -> FileSystemBackend {
    FileSystemBackend::new(root.path(), BackendSettings::new("local"))
}

fn local_service(root: &TempDir, threshold: u64, part_size: u64) -> Result<TransferService> {
    let config = TransferConfig {
        default_backend: "local".to_string(),
        multipart_threshold: threshold,
        part_size,
        ..TransferConfig::default()
    };
    Ok(TransferService::builder(config)
        .backend(Arc::new(local(root)))
        .recorder(Arc::new(MemoryRecorder::new()))
        .build()?)
}

#[tokio::test]
async fn test_put_get_head_delete() -> Result<()> {
    print_test_header("put/get/head/delete", "local");
    let tmp = TempDir::new()?;
    let backend = local(&tmp);
    let opts = PutOptions::default();

    backend.put_object("a/b/c.txt", Bytes::from_static(b"hello"), &opts).await?;
    assert!(tmp.path().join("a/b/c.txt").is_file());
    assert_eq!(backend.get_object("a/b/c.txt").await?.as_ref(), b"hello");

    let stat = backend.head_object("a/b/c.txt").await?.expect("file exists");
    assert_eq!(stat.size, 5);
    assert!(stat.e_tag.as_deref().is_some_and(|t| t.starts_with("file-5-")));
    assert!(backend.exists("a/b/c.txt").await?);

    backend.delete_object("a/b/c.txt").await?;
    backend.delete_object("a/b/c.txt").await?;
    assert!(backend.head_object("a/b/c.txt").await?.is_none());
    assert!(matches!(
        backend.get_object("a/b/c.txt").await,
        Err(transferkit::BackendError::NotFound(_))
    ));

    println!("✅ basic object operations on disk");
    Ok(())
}

#[tokio::test]
async fn test_keys_stay_inside_root() -> Result<()> {
    let tmp = TempDir::new()?;
    let backend = local(&tmp);
    let opts = PutOptions::default();

    for key in ["../escape.txt", "a/../../escape.txt", ".multipart/abc/part-00001", ""] {
        let result = backend.put_object(key, Bytes::from_static(b"x"), &opts).await;
        assert!(result.is_err(), "key `{key}` should be rejected");
    }
    assert!(!tmp.path().parent().expect("temp dir has a parent").join("escape.txt").exists());

    println!("✅ traversal and staging-area keys refused");
    Ok(())
}

#[tokio::test]
async fn test_capabilities_and_unsupported_ops() -> Result<()> {
    let tmp = TempDir::new()?;
    let backend = local(&tmp);
    let caps = backend.capabilities();
    assert!(caps.supports(Capability::MultipartUpload));
    assert!(caps.supports(Capability::SameMove));
    assert!(!caps.supports(Capability::Acl));
    assert!(!caps.supports(Capability::PresignedUrl));

    backend.put_object("k", Bytes::from_static(b"x"), &PutOptions::default()).await?;
    assert!(matches!(
        backend.set_object_acl("k", "private").await,
        Err(transferkit::BackendError::Unsupported(Capability::Acl))
    ));

    let service = local_service(&tmp, 1024, 256)?;
    let err = service
        .upload(UploadRequest::from_bytes(payload(3)).save_filename("acl.bin").acl("private"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::UnsupportedCapability { .. }));

    println!("✅ local backend declares what it lacks");
    Ok(())
}

#[tokio::test]
async fn test_staged_session_survives_new_instance() -> Result<()> {
    let tmp = TempDir::new()?;
    let first = local(&tmp);
    let upload_id = first.create_multipart("big/file.bin", &PutOptions::default()).await?;
    let e1 = first.upload_part("big/file.bin", &upload_id, 1, Bytes::from(payload(5))).await?;
    drop(first);

    let second = local(&tmp);
    let e2 = second.upload_part("big/file.bin", &upload_id, 2, Bytes::from(payload(3))).await?;
    let listing = second.list_parts("big/file.bin", &upload_id, 1000, None).await?;
    assert_eq!(listing.parts.len(), 2);
    assert_eq!(listing.parts[0].e_tag, e1);
    assert_eq!(listing.parts[1].e_tag, e2);

    // session belongs to one key only
    assert!(matches!(
        second.upload_part("other.bin", &upload_id, 3, Bytes::new()).await,
        Err(transferkit::BackendError::NoSuchSession(_))
    ));

    second.complete_multipart("big/file.bin", &upload_id, &listing.parts).await?;
    let mut expected = payload(5);
    expected.extend(payload(3));
    assert_eq!(second.get_object("big/file.bin").await?.as_ref(), expected.as_slice());
    assert!(!tmp.path().join(".multipart").join(&upload_id).exists());

    assert!(matches!(
        second.abort_multipart("big/file.bin", &upload_id).await,
        Err(transferkit::BackendError::NoSuchSession(_))
    ));

    println!("✅ staged parts picked up by a second backend instance");
    Ok(())
}

#[tokio::test]
async fn test_listing_hides_staging_and_temp_files() -> Result<()> {
    let tmp = TempDir::new()?;
    let backend = local(&tmp);
    let opts = PutOptions::default();
    backend.put_object("top.txt", Bytes::from_static(b"1"), &opts).await?;
    backend.put_object("docs/readme.md", Bytes::from_static(b"22"), &opts).await?;
    let upload_id = backend.create_multipart("pending.bin", &opts).await?;
    tokio::fs::write(tmp.path().join(".transferkit-top.txt.abc.tmp"), b"partial").await?;

    let service = local_service(&tmp, 1024, 256)?;
    let root = service.list_files(ListFilesRequest::new("")).await?.expect("listing supported");
    let files: Vec<&str> = root.files.iter().map(|f| f.filename.as_str()).collect();
    let dirs: Vec<&str> = root.dirs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(files, vec!["top.txt"]);
    assert_eq!(dirs, vec!["docs"]);

    let docs = service.list_files(ListFilesRequest::new("docs")).await?.expect("listing supported");
    assert_eq!(docs.files.len(), 1);
    assert_eq!(docs.files[0].size, 2);
    assert_eq!(docs.files[0].ext.as_deref(), Some("md"));

    backend.abort_multipart("pending.bin", &upload_id).await?;
    println!("✅ listing shows only finished objects");
    Ok(())
}

#[tokio::test]
async fn test_chunked_service_upload_to_disk() -> Result<()> {
    print_test_header("chunked upload", "local");
    let tmp = TempDir::new()?;
    let service = local_service(&tmp, 64, 16)?;

    let data = payload(100);
    let desc = service
        .upload(UploadRequest::from_bytes(data.clone()).path("uploads").save_filename("blob.bin"))
        .await?;

    assert_eq!(desc.size, Some(100));
    assert_eq!(tokio::fs::read(tmp.path().join("uploads/blob.bin")).await?, data);
    let mut staging = tokio::fs::read_dir(tmp.path().join(".multipart")).await?;
    assert!(staging.next_entry().await?.is_none());

    let mut out = Vec::new();
    assert_eq!(service.download_to(&desc, &mut out).await?, 100);
    assert_eq!(out, data);

    println!("✅ 100 bytes in 16-byte parts assembled on disk");
    Ok(())
}

#[tokio::test]
async fn test_copy_and_rename_on_disk() -> Result<()> {
    let tmp = TempDir::new()?;
    let service = local_service(&tmp, 1024, 256)?;
    let src = service
        .upload(UploadRequest::from_bytes(payload(20)).path("in").save_filename("f.bin"))
        .await?;

    let copy = service
        .copy_file(&src, CopyRequest::new().path("copies").filename("f1.bin"))
        .await?;
    assert!(tmp.path().join("copies/f1.bin").is_file());
    assert!(tmp.path().join("in/f.bin").is_file());
    assert_eq!(copy.size, Some(20));

    let moved = service
        .move_file(&copy, MoveRequest::new().path("archive/2025"))
        .await?;
    assert!(!tmp.path().join("copies/f1.bin").exists());
    assert_eq!(tokio::fs::read(tmp.path().join("archive/2025/f1.bin")).await?, payload(20));
    assert_eq!(moved.key(), "archive/2025/f1.bin");

    println!("✅ copy and rename on the local backend");
    Ok(())
}

#[tokio::test]
async fn test_cross_copy_onto_disk_can_drop_attributes() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = TransferConfig {
        default_backend: "mem".to_string(),
        ..TransferConfig::default()
    };
    let service = TransferService::builder(config)
        .backend(Arc::new(MemoryBackend::named("mem")))
        .backend(Arc::new(local(&tmp)))
        .recorder(Arc::new(MemoryRecorder::new()))
        .build()?;
    let src = service
        .upload(
            UploadRequest::from_bytes(payload(12))
                .path("in")
                .save_filename("tagged.bin")
                .user_metadata("owner", "ops")
                .acl("public-read"),
        )
        .await?;

    let err = service
        .copy_file(&src, CopyRequest::new().backend("local").mode(CopyMode::Cross))
        .await
        .unwrap_err();
    assert!(err.is_unsupported(), "got {err:?}");
    assert!(!tmp.path().join("in/tagged.bin").exists());

    let copy = service
        .copy_file(&src, CopyRequest::new().backend("local").best_effort())
        .await?;
    assert_eq!(copy.backend, "local");
    assert!(copy.user_metadata.is_empty());
    assert!(copy.acl.is_none());
    assert_eq!(tokio::fs::read(tmp.path().join("in/tagged.bin")).await?, payload(12));

    println!("✅ best-effort cross copy drops what the disk cannot keep");
    Ok(())
}
