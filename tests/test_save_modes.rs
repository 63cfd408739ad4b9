// tests/test_save_modes.rs
//
// Single-shot vs chunked selection, round trips and chunk boundaries.

mod common;

use std::sync::Arc;

use anyhow::Result;
use transferkit::{
    BackendSettings, CapabilityDescriptor, ContentHasher, HashAlgorithm, HashInfo, MemoryBackend, Recorder,
    TransferDescriptor, UploadRequest, UploadStatus,
};

use common::{FaultyBackend, MIB, config, payload, service_with};

#[tokio::test]
async fn test_small_upload_is_single_shot() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, recorder) = service_with(backend.clone(), config(1024, 256));

    let data = payload(1000);
    let desc = service
        .upload(UploadRequest::from_bytes(data.clone()).path("docs").save_filename("a.bin"))
        .await?;

    assert_eq!(backend.calls("put_object"), 1);
    assert_eq!(backend.calls("create_multipart"), 0);
    assert_eq!(desc.key(), "docs/a.bin");
    assert_eq!(desc.url, "mem://docs/a.bin");
    assert_eq!(desc.size, Some(1000));
    assert_eq!(desc.hash, Some(HashInfo::crc32_of(&data)));
    assert_eq!(desc.upload_status, UploadStatus::Completed);
    assert!(desc.upload_session_id.is_none());

    assert_eq!(service.download(&desc).await?.as_ref(), data.as_slice());
    assert_eq!(recorder.get_by_url(&desc.url).await?, Some(desc.clone()));

    println!("✅ below-threshold upload used one put");
    Ok(())
}

#[tokio::test]
async fn test_size_equal_to_threshold_is_chunked() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(1024, 256));

    let data = payload(1024);
    let desc = service.upload(UploadRequest::from_bytes(data.clone()).save_filename("edge.bin")).await?;

    assert_eq!(backend.calls("put_object"), 0);
    assert_eq!(backend.calls("create_multipart"), 1);
    assert_eq!(backend.uploaded_parts(), vec![1, 2, 3, 4]);
    assert_eq!(backend.calls("complete_multipart"), 1);
    assert_eq!(service.download(&desc).await?.as_ref(), data.as_slice());
    assert_eq!(desc.hash, Some(HashInfo::crc32_of(&data)));

    println!("✅ size == threshold goes through a multipart session");
    Ok(())
}

#[tokio::test]
async fn test_twelve_mib_in_five_mib_parts() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8 * MIB as u64, 5 * MIB as u64));

    let data = payload(12 * MIB);
    let desc = service.upload(UploadRequest::from_bytes(data.clone()).save_filename("big.bin")).await?;

    assert_eq!(backend.uploaded_parts(), vec![1, 2, 3]);
    assert_eq!(backend.inner.open_sessions().await, 0);
    assert_eq!(desc.size, Some(12 * MIB as u64));
    let back = service.download(&desc).await?;
    assert_eq!(back.len(), 12 * MIB);
    assert!(back.as_ref() == data.as_slice());

    println!("✅ 12 MiB at 8 MiB threshold and 5 MiB parts -> 3 parts");
    Ok(())
}

#[tokio::test]
async fn test_unknown_size_stream_is_chunked() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8 * MIB as u64, 5 * MIB as u64));

    let data = payload(42);
    let reader = std::io::Cursor::new(data.clone());
    let desc = service
        .upload(UploadRequest::from_reader(reader, None).save_filename("stream.bin"))
        .await?;

    assert_eq!(backend.calls("create_multipart"), 1);
    assert_eq!(backend.uploaded_parts(), vec![1]);
    assert_eq!(desc.size, Some(42));
    assert_eq!(service.download(&desc).await?.as_ref(), data.as_slice());

    println!("✅ 42 bytes of unknown size -> one-part session");
    Ok(())
}

#[tokio::test]
async fn test_unknown_size_without_multipart_is_buffered() -> Result<()> {
    let backend = Arc::new(FaultyBackend::with_capabilities("mem", CapabilityDescriptor::minimal()));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let data = payload(100);
    let desc = service
        .upload(UploadRequest::from_reader(std::io::Cursor::new(data.clone()), None).save_filename("s.bin"))
        .await?;

    assert_eq!(backend.calls("put_object"), 1);
    assert_eq!(backend.calls("create_multipart"), 0);
    assert_eq!(desc.size, Some(100));

    println!("✅ backend without multipart gets a single put");
    Ok(())
}

#[tokio::test]
async fn test_empty_stream_in_chunked_mode() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let desc = service
        .upload(UploadRequest::from_reader(std::io::Cursor::new(Vec::<u8>::new()), None).save_filename("empty"))
        .await?;

    assert_eq!(backend.uploaded_parts(), vec![1]);
    assert_eq!(desc.size, Some(0));
    assert!(service.exists(&desc).await?);
    assert!(service.download(&desc).await?.is_empty());

    println!("✅ empty stream completes with a single empty part");
    Ok(())
}

#[tokio::test]
async fn test_exact_multiple_of_part_size() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let data = payload(16);
    let desc = service.upload(UploadRequest::from_bytes(data.clone()).save_filename("x")).await?;

    assert_eq!(backend.uploaded_parts(), vec![1, 2, 3, 4]);
    assert_eq!(service.download(&desc).await?.as_ref(), data.as_slice());

    println!("✅ no trailing empty part when size is a multiple of the part size");
    Ok(())
}

#[tokio::test]
async fn test_backend_overrides_threshold() -> Result<()> {
    let settings = BackendSettings::new("mem").with_multipart(10, 5);
    let backend = Arc::new(FaultyBackend::new(MemoryBackend::new(settings)));
    let (service, _) = service_with(backend.clone(), config(1 << 30, 1 << 20));

    service.upload(UploadRequest::from_bytes(payload(12)).save_filename("o")).await?;
    assert_eq!(backend.uploaded_parts(), vec![1, 2, 3]);

    println!("✅ per-backend threshold and part size win over the engine defaults");
    Ok(())
}

#[tokio::test]
async fn test_generated_filename_and_side_artifact() -> Result<()> {
    let tmp = tempfile::TempDir::new()?;
    let file = tmp.path().join("holiday.jpg");
    tokio::fs::write(&file, payload(300)).await?;

    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(1024, 256));

    let desc = service
        .upload(
            UploadRequest::from_path(&file)
                .path("photos/")
                .side_artifact(payload(20))
                .side_artifact_content_type("image/jpeg"),
        )
        .await?;

    assert_eq!(desc.original_filename.as_deref(), Some("holiday.jpg"));
    assert_eq!(desc.ext.as_deref(), Some("jpg"));
    let (id, ext) = desc.filename.split_once('.').expect("generated name has an extension");
    assert_eq!(ext, "jpg");
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(desc.size, Some(300));

    let side = desc.side_artifact_filename.clone().expect("side artifact named");
    assert_eq!(side, format!("{}.min.jpg", desc.filename));
    assert_eq!(desc.side_artifact_size, Some(20));
    assert_eq!(service.download_side_artifact(&desc).await?.len(), 20);
    assert_eq!(backend.inner.object_count().await, 2);

    println!("✅ generated filename {} with side artifact {}", desc.filename, side);
    Ok(())
}

#[tokio::test]
async fn test_delete_is_idempotent() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, recorder) = service_with(backend.clone(), config(1024, 256));

    let desc = service
        .upload(UploadRequest::from_bytes(payload(10)).save_filename("d.bin").side_artifact(payload(3)))
        .await?;
    assert!(service.exists_by_url(&desc.url).await?);

    assert!(service.delete(&desc).await?);
    assert!(!service.exists(&desc).await?);
    assert_eq!(backend.inner.object_count().await, 0);
    assert!(recorder.is_empty().await);

    // second delete of the same descriptor is still fine
    assert!(service.delete(&desc).await?);
    assert!(!service.delete_by_url(&desc.url).await?);

    let missing = TransferDescriptor::new("mem", "", "nowhere/", "gone.bin");
    assert!(service.delete(&missing).await?);
    assert!(service.download(&missing).await.unwrap_err().is_not_found());

    println!("✅ delete tolerates missing objects");
    Ok(())
}

#[tokio::test]
async fn test_requested_digests_match_in_both_modes() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(64, 16));

    let mut whole = ContentHasher::new(&[HashAlgorithm::Md5, HashAlgorithm::Sha256]);
    whole.update(&payload(50));
    let expected = whole.finish();

    let single = service
        .upload(
            UploadRequest::from_bytes(payload(50))
                .save_filename("single.bin")
                .hash(HashAlgorithm::Md5)
                .hash(HashAlgorithm::Sha256),
        )
        .await?;
    // 50 bytes above a 40-byte threshold go in 16-byte parts
    let (chunked_service, _) = service_with(backend.clone(), config(40, 16));
    let chunked = chunked_service
        .upload(
            UploadRequest::from_bytes(payload(50))
                .save_filename("chunked.bin")
                .hash(HashAlgorithm::Sha256)
                .hash(HashAlgorithm::Md5),
        )
        .await?;
    assert_eq!(backend.calls("upload_part"), 4);

    assert_eq!(single.hash.as_ref(), Some(&expected));
    assert_eq!(chunked.hash.as_ref(), Some(&expected));
    let hash = single.hash.expect("hash computed");
    assert_eq!(hash.get(HashAlgorithm::Md5).map(str::len), Some(32));
    assert_eq!(hash.get(HashAlgorithm::Sha256).map(str::len), Some(64));
    assert_eq!(hash.get(HashAlgorithm::Sha1), None);

    println!("✅ md5 and sha256 agree between single-shot and chunked uploads");
    Ok(())
}
