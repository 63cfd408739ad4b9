// tests/test_multipart.rs
//
// Caller-driven multipart sessions: initiate, parts in any order, complete,
// abort and resume from a fresh service.

mod common;

use std::sync::Arc;

use anyhow::Result;
use transferkit::{
    CapabilityDescriptor, InitiateMultipartRequest, PartDescriptor, Recorder, TransferDescriptor, TransferError,
    UploadStatus,
};

use common::{FaultyBackend, config, payload, service_with};

#[tokio::test]
async fn test_manual_flow_with_concurrent_parts() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, recorder) = service_with(backend.clone(), config(8, 4));
    let service = Arc::new(service);

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().path("videos").save_filename("clip.mp4"))
        .await?;
    assert_eq!(desc.upload_status, UploadStatus::Initiated);
    let session_id = desc.upload_session_id.clone().expect("session id assigned");
    assert!(recorder.is_empty().await);

    let data = payload(30);
    let chunks: Vec<Vec<u8>> = data.chunks(10).map(<[u8]>::to_vec).collect();

    // upload in reverse order from separate tasks
    let mut handles = Vec::new();
    for (idx, chunk) in chunks.into_iter().enumerate().rev() {
        let service = Arc::clone(&service);
        let desc = desc.clone();
        handles.push(tokio::spawn(async move {
            service.upload_part(&desc, idx as u32 + 1, chunk).await
        }));
    }
    for handle in handles {
        let part = handle.await??;
        assert_eq!(part.upload_session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(part.part_size, 10);
    }
    assert_eq!(recorder.parts_for(&session_id).await.len(), 3);

    service.complete_multipart(&mut desc, None).await?;
    assert_eq!(desc.upload_status, UploadStatus::Completed);
    assert!(desc.upload_session_id.is_none());
    assert_eq!(desc.size, Some(30));
    assert_eq!(backend.calls("list_parts"), 1);
    assert_eq!(service.download(&desc).await?.as_ref(), data.as_slice());

    assert!(recorder.parts_for(&session_id).await.is_empty());
    assert_eq!(recorder.get_by_url(&desc.url).await?, Some(desc.clone()));

    println!("✅ parts uploaded out of order assemble in part-number order");
    Ok(())
}

#[tokio::test]
async fn test_gap_or_duplicate_is_rejected_before_backend() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("gap.bin"))
        .await?;
    let p1 = service.upload_part(&desc, 1, payload(4)).await?;
    let p3 = service.upload_part(&desc, 3, payload(4)).await?;

    let err = service
        .complete_multipart(&mut desc, Some(vec![p1.clone(), p3]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SessionState { ref reason, .. } if reason.contains("missing part number 2")));

    let err = service
        .complete_multipart(&mut desc, Some(vec![p1.clone(), p1.clone()]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SessionState { ref reason, .. } if reason.contains("duplicate")));
    assert_eq!(backend.calls("complete_multipart"), 0);
    assert_eq!(desc.upload_status, UploadStatus::Initiated);

    let err = service.upload_part(&desc, 0, payload(1)).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidRequest(_)));

    service.abort_multipart(&mut desc).await?;
    println!("✅ gaps, duplicates and part 0 never reach the backend");
    Ok(())
}

#[tokio::test]
async fn test_resume_from_fresh_service() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (first, _) = service_with(backend.clone(), config(8, 4));

    let desc = first
        .initiate_multipart(InitiateMultipartRequest::new().path("r").save_filename("resume.bin"))
        .await?;
    let p1 = first.upload_part(&desc, 1, payload(6)).await?;
    drop(first);

    // only the descriptor survives; a second service picks it up
    let (second, _) = service_with(backend.clone(), config(8, 4));
    let mut desc: TransferDescriptor = serde_json::from_str(&serde_json::to_string(&desc)?)?;
    let p2 = second.upload_part(&desc, 2, payload(3)).await?;
    second.complete_multipart(&mut desc, Some(vec![p2, p1])).await?;

    assert_eq!(desc.size, Some(9));
    let back = second.download(&desc).await?;
    let mut expected = payload(6);
    expected.extend(payload(3));
    assert_eq!(back.as_ref(), expected.as_slice());

    println!("✅ session resumed from a serialized descriptor");
    Ok(())
}

#[tokio::test]
async fn test_double_abort_is_session_error() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("a.bin"))
        .await?;
    let stale = desc.clone();
    service.upload_part(&desc, 1, payload(4)).await?;

    service.abort_multipart(&mut desc).await?;
    assert_eq!(desc.upload_status, UploadStatus::Aborted);
    assert!(desc.upload_session_id.is_none());
    assert_eq!(backend.inner.open_sessions().await, 0);

    // the updated descriptor has no session left
    let err = service.abort_multipart(&mut desc).await.unwrap_err();
    assert!(matches!(err, TransferError::SessionState { .. }));

    // a stale copy still names the session, which the backend no longer knows
    let mut stale = stale;
    let err = service.abort_multipart(&mut stale).await.unwrap_err();
    assert!(matches!(err, TransferError::SessionState { ref reason, .. } if reason.contains("does not exist")));

    let err = service.upload_part(&stale, 2, payload(4)).await.unwrap_err();
    assert!(matches!(err, TransferError::SessionState { .. }));

    println!("✅ aborting twice reports a session-state error");
    Ok(())
}

#[tokio::test]
async fn test_list_parts_pages() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("pages.bin"))
        .await?;
    for n in 1..=5u32 {
        service.upload_part(&desc, n, payload(2)).await?;
    }

    let first = service.list_parts(&desc, Some(2), None).await?.expect("listing supported");
    let numbers: Vec<u32> = first.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert!(first.is_truncated);
    assert_eq!(first.next_part_number_marker, Some(2));

    let second = service.list_parts(&desc, Some(2), Some(4)).await?.expect("listing supported");
    let numbers: Vec<u32> = second.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![5]);
    assert!(!second.is_truncated);

    // None gathers every page
    service.complete_multipart(&mut desc, None).await?;
    assert_eq!(desc.size, Some(10));

    println!("✅ list_parts paginates by part-number marker");
    Ok(())
}

#[tokio::test]
async fn test_complete_without_list_parts_needs_explicit_parts() -> Result<()> {
    let mut caps = CapabilityDescriptor::full();
    caps.list_parts = false;
    let backend = Arc::new(FaultyBackend::with_capabilities("mem", caps));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("n.bin"))
        .await?;
    let part = service.upload_part(&desc, 1, payload(4)).await?;

    let err = service.complete_multipart(&mut desc, None).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidRequest(_)));
    assert!(service.list_parts(&desc, None, None).await.unwrap_err().is_unsupported());

    service.complete_multipart(&mut desc, Some(vec![part])).await?;
    assert_eq!(desc.upload_status, UploadStatus::Completed);

    println!("✅ explicit part lists work where listing is missing");
    Ok(())
}

#[tokio::test]
async fn test_initiate_requires_multipart() -> Result<()> {
    let backend = Arc::new(FaultyBackend::with_capabilities("mem", CapabilityDescriptor::minimal()));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let err = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("x.bin"))
        .await
        .unwrap_err();
    assert!(err.is_unsupported(), "got {err:?}");
    assert_eq!(backend.calls("create_multipart"), 0);

    println!("✅ initiate on a single-shot backend is refused");
    Ok(())
}

#[tokio::test]
async fn test_part_etags_are_checked_on_complete() -> Result<()> {
    let backend = Arc::new(FaultyBackend::named("mem"));
    let (service, _) = service_with(backend.clone(), config(8, 4));

    let mut desc = service
        .initiate_multipart(InitiateMultipartRequest::new().save_filename("e.bin"))
        .await?;
    service.upload_part(&desc, 1, payload(4)).await?;

    let forged = PartDescriptor::new(1, "00000000", 4);
    let err = service.complete_multipart(&mut desc, Some(vec![forged])).await.unwrap_err();
    assert!(matches!(err, TransferError::Transfer { .. }), "got {err:?}");
    assert_eq!(desc.upload_status, UploadStatus::Initiated);

    service.abort_multipart(&mut desc).await?;
    println!("✅ mismatched ETag is refused by the backend");
    Ok(())
}
