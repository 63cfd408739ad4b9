// tests/common/mod.rs
//
// Shared fixtures: a fault-injecting backend wrapper, a progress recorder and
// service builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

use transferkit::{
    BackendError, BackendResult, BackendSettings, CapabilityDescriptor, MemoryBackend, MemoryRecorder,
    ObjectListing, ObjectStat, PartDescriptor, PartListing, PresignRequest, ProgressObserver, PutOptions,
    StorageBackend, TransferConfig, TransferService,
};

pub const MIB: usize = 1024 * 1024;

/// Deterministic, non-repeating-per-MiB test bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

pub fn config(threshold: u64, part_size: u64) -> TransferConfig {
    TransferConfig {
        default_backend: "mem".to_string(),
        multipart_threshold: threshold,
        part_size,
        ..TransferConfig::default()
    }
}

/// Service over `backend` with an in-memory recorder.
pub fn service_with(backend: Arc<dyn StorageBackend>, config: TransferConfig) -> (TransferService, Arc<MemoryRecorder>) {
    let recorder = Arc::new(MemoryRecorder::new());
    let service = TransferService::builder(config)
        .backend(backend)
        .recorder(recorder.clone())
        .build()
        .expect("service builds");
    (service, recorder)
}

fn injected(what: &str) -> BackendError {
    BackendError::Other(anyhow!("injected failure: {what}"))
}

/// `MemoryBackend` wrapper counting calls and failing on demand.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    uploaded_parts: Mutex<Vec<u32>>,
    /// Fail every `put_object` whose key ends with this suffix.
    pub fail_put_suffix: Mutex<Option<String>>,
    /// Store only the first N bytes of a larger `put_object`, then fail (0 = never).
    pub fail_put_after_bytes: AtomicUsize,
    /// Fail `upload_part` for this part number (0 = never).
    pub fail_part: AtomicU32,
    /// Fail `upload_part_copy` for this part number (0 = never).
    pub fail_part_copy: AtomicU32,
    pub fail_copy: AtomicBool,
    pub fail_complete: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Fail deletes of keys ending with this suffix.
    pub fail_delete_suffix: Mutex<Option<String>>,
    pub fail_aborts: AtomicBool,
    /// Apply the rename, then report an error anyway.
    pub rename_applies_then_fails: AtomicBool,
    /// Report an error without renaming.
    pub fail_rename: AtomicBool,
}

impl FaultyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            uploaded_parts: Mutex::new(Vec::new()),
            fail_put_suffix: Mutex::new(None),
            fail_put_after_bytes: AtomicUsize::new(0),
            fail_part: AtomicU32::new(0),
            fail_part_copy: AtomicU32::new(0),
            fail_copy: AtomicBool::new(false),
            fail_complete: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_delete_suffix: Mutex::new(None),
            fail_aborts: AtomicBool::new(false),
            rename_applies_then_fails: AtomicBool::new(false),
            fail_rename: AtomicBool::new(false),
        }
    }

    pub fn named(name: &str) -> Self {
        Self::new(MemoryBackend::named(name))
    }

    pub fn with_capabilities(name: &str, capabilities: CapabilityDescriptor) -> Self {
        Self::new(MemoryBackend::new(BackendSettings::new(name)).with_capabilities(capabilities))
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Part numbers passed to `upload_part`, in call order.
    pub fn uploaded_parts(&self) -> Vec<u32> {
        self.uploaded_parts.lock().unwrap().clone()
    }

    pub fn fail_puts_ending_with(&self, suffix: &str) {
        *self.fail_put_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    pub fn fail_deletes_ending_with(&self, suffix: &str) {
        *self.fail_delete_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    fn count(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
    }

    fn matches(slot: &Mutex<Option<String>>, key: &str) -> bool {
        slot.lock().unwrap().as_deref().is_some_and(|s| key.ends_with(s))
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    fn settings(&self) -> &BackendSettings {
        self.inner.settings()
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        self.inner.capabilities()
    }

    fn native_acls(&self) -> &[&'static str] {
        &["bucket-owner-full-control"]
    }

    async fn put_object(&self, key: &str, data: Bytes, opts: &PutOptions) -> BackendResult<()> {
        self.count("put_object");
        if Self::matches(&self.fail_put_suffix, key) {
            return Err(injected("put_object"));
        }
        let limit = self.fail_put_after_bytes.load(Ordering::SeqCst);
        if limit > 0 && data.len() > limit {
            self.inner.put_object(key, data.slice(..limit), opts).await?;
            return Err(injected("put_object after partial write"));
        }
        self.inner.put_object(key, data, opts).await
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        self.count("get_object");
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        self.count("delete_object");
        if self.fail_deletes.load(Ordering::SeqCst) || Self::matches(&self.fail_delete_suffix, key) {
            return Err(injected("delete_object"));
        }
        self.inner.delete_object(key).await
    }

    async fn head_object(&self, key: &str) -> BackendResult<Option<ObjectStat>> {
        self.count("head_object");
        self.inner.head_object(key).await
    }

    async fn copy_object(&self, src: &str, dst: &str, opts: &PutOptions) -> BackendResult<()> {
        self.count("copy_object");
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(injected("copy_object"));
        }
        self.inner.copy_object(src, dst, opts).await
    }

    async fn rename_object(&self, src: &str, dst: &str) -> BackendResult<()> {
        self.count("rename_object");
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(injected("rename_object"));
        }
        self.inner.rename_object(src, dst).await?;
        if self.rename_applies_then_fails.load(Ordering::SeqCst) {
            return Err(injected("rename_object after apply"));
        }
        Ok(())
    }

    async fn create_multipart(&self, key: &str, opts: &PutOptions) -> BackendResult<String> {
        self.count("create_multipart");
        self.inner.create_multipart(key, opts).await
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> BackendResult<String> {
        self.count("upload_part");
        self.uploaded_parts.lock().unwrap().push(part_number);
        if self.fail_part.load(Ordering::SeqCst) == part_number {
            return Err(injected("upload_part"));
        }
        self.inner.upload_part(key, upload_id, part_number, data).await
    }

    async fn upload_part_copy(
        &self,
        src: &str,
        dst: &str,
        upload_id: &str,
        part_number: u32,
        range: Range<u64>,
    ) -> BackendResult<String> {
        self.count("upload_part_copy");
        if self.fail_part_copy.load(Ordering::SeqCst) == part_number {
            return Err(injected("upload_part_copy"));
        }
        self.inner.upload_part_copy(src, dst, upload_id, part_number, range).await
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[PartDescriptor]) -> BackendResult<()> {
        self.count("complete_multipart");
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(injected("complete_multipart"));
        }
        self.inner.complete_multipart(key, upload_id, parts).await
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> BackendResult<()> {
        self.count("abort_multipart");
        if self.fail_aborts.load(Ordering::SeqCst) {
            return Err(injected("abort_multipart"));
        }
        self.inner.abort_multipart(key, upload_id).await
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: Option<u32>,
    ) -> BackendResult<PartListing> {
        self.count("list_parts");
        self.inner.list_parts(key, upload_id, max_parts, part_number_marker).await
    }

    async fn list_objects(
        &self,
        dir: &str,
        prefix: &str,
        marker: Option<&str>,
        max_files: usize,
    ) -> BackendResult<ObjectListing> {
        self.count("list_objects");
        self.inner.list_objects(dir, prefix, marker, max_files).await
    }

    async fn presigned_url(&self, key: &str, request: &PresignRequest) -> BackendResult<String> {
        self.count("presigned_url");
        self.inner.presigned_url(key, request).await
    }

    async fn set_object_acl(&self, key: &str, acl: &str) -> BackendResult<()> {
        self.count("set_object_acl");
        self.inner.set_object_acl(key, acl).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Progress(u64, Option<u64>),
    Finish,
}

/// Observer that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn progress_values(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(n, _) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn finished(&self) -> bool {
        self.count(&Event::Finish) > 0
    }

    /// Start first and once, progress monotone, finish last and once.
    pub fn assert_complete_protocol(&self, total: u64) {
        let events = self.events();
        assert_eq!(events.first(), Some(&Event::Start), "events: {events:?}");
        assert_eq!(events.last(), Some(&Event::Finish), "events: {events:?}");
        assert_eq!(self.count(&Event::Start), 1);
        assert_eq!(self.count(&Event::Finish), 1);
        let values = self.progress_values();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {values:?}");
        assert!(values.iter().all(|v| *v <= total));
        assert_eq!(values.last().copied(), Some(total));
    }
}

impl ProgressObserver for RecordingObserver {
    fn start(&self) {
        self.events.lock().unwrap().push(Event::Start);
    }

    fn progress(&self, transferred: u64, total: Option<u64>) {
        self.events.lock().unwrap().push(Event::Progress(transferred, total));
    }

    fn finish(&self) {
        self.events.lock().unwrap().push(Event::Finish);
    }
}

/// Source that yields `data` and then fails instead of reporting end of stream.
pub struct BrokenReader {
    data: Vec<u8>,
    pos: usize,
}

impl BrokenReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsyncRead for BrokenReader {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.pos >= self.data.len() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away")));
        }
        let n = (self.data.len() - self.pos).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Print test header with formatting
pub fn print_test_header(test_name: &str, backend_name: &str) {
    println!("\n{}", "=".repeat(60));
    println!("TEST: {}", test_name);
    println!("Backend: {}", backend_name);
    println!("{}", "=".repeat(60));
}
