// src/progress.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Push-based progress reporting for transfers, plus an indicatif bar for the CLI.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Observer notified while the primary object of a transfer moves.
///
/// Contract: `start` once before the first byte, `progress` zero or more times
/// with a non-decreasing byte count, `finish` once after success. A failed
/// transfer never sees `finish`.
pub trait ProgressObserver: Send + Sync {
    fn start(&self) {}

    fn progress(&self, transferred: u64, total: Option<u64>);

    fn finish(&self) {}
}

/// Adapts a closure taking `(transferred, total)` into an observer.
pub struct FnObserver<F>(pub F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(u64, Option<u64>) + Send + Sync,
{
    fn progress(&self, transferred: u64, total: Option<u64>) {
        (self.0)(transferred, total)
    }
}

/// Wrap a closure as a shareable observer.
pub fn progress_fn<F>(f: F) -> Arc<dyn ProgressObserver>
where
    F: Fn(u64, Option<u64>) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

/// Lock-free counters, handy when a caller only wants the totals.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    pub started: AtomicBool,
    pub finished: AtomicBool,
    pub bytes_transferred: AtomicU64,
    pub updates: AtomicU64,
}

impl ProgressCounter {
    pub fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for ProgressCounter {
    fn start(&self) {
        self.started.store(true, Ordering::Relaxed);
    }

    fn progress(&self, transferred: u64, _total: Option<u64>) {
        self.bytes_transferred.store(transferred, Ordering::Relaxed);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Terminal progress bar with warp-style formatting.
pub struct ProgressBarObserver {
    operation: String,
    progress_bar: ProgressBar,
    started_at: std::sync::Mutex<Option<Instant>>,
}

impl ProgressBarObserver {
    /// Bar for a transfer with known size, or a spinner when `total_bytes` is `None`.
    pub fn new(operation: &str, total_bytes: Option<u64>) -> Self {
        let pb = match total_bytes {
            Some(total) => {
                let pb = ProgressBar::new(total);
                let style = ProgressStyle::default_bar()
                    .template(&format!(
                        "{operation}: {{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, ETA: {{eta}})"
                    ))
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  ");
                pb.set_style(style);
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                let style = ProgressStyle::default_spinner()
                    .template(&format!("{operation}: {{spinner:.green}} {{bytes}} {{msg}}"))
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
                pb.set_style(style);
                pb
            }
        };

        Self {
            operation: operation.to_string(),
            progress_bar: pb,
            started_at: std::sync::Mutex::new(None),
        }
    }

    pub fn hidden() -> Self {
        Self {
            operation: String::new(),
            progress_bar: ProgressBar::hidden(),
            started_at: std::sync::Mutex::new(None),
        }
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn start(&self) {
        if let Ok(mut guard) = self.started_at.lock() {
            *guard = Some(Instant::now());
        }
        self.progress_bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn progress(&self, transferred: u64, total: Option<u64>) {
        if let Some(total) = total {
            // The total can be discovered mid-transfer
            self.progress_bar.set_length(total);
        }
        self.progress_bar.set_position(transferred);
    }

    fn finish(&self) {
        let total_bytes = self.progress_bar.position();
        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|g| (*g).map(|t| t.elapsed()))
            .unwrap_or_default();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let mib = total_bytes as f64 / 1_048_576.0;
        self.progress_bar.finish_with_message(format!(
            "{} complete! {:.2} MB in {:.2}s ({:.2} MB/s)",
            self.operation,
            mib,
            elapsed.as_secs_f64(),
            mib / secs
        ));
    }
}

/// Drives an optional observer while enforcing the protocol.
pub(crate) struct ProgressReporter {
    observer: Option<Arc<dyn ProgressObserver>>,
    total: Option<u64>,
    last: u64,
    started: bool,
    finished: bool,
}

impl ProgressReporter {
    pub(crate) fn new(observer: Option<Arc<dyn ProgressObserver>>, total: Option<u64>) -> Self {
        Self {
            observer,
            total,
            last: 0,
            started: false,
            finished: false,
        }
    }

    pub(crate) fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if let Some(o) = &self.observer {
            o.start();
        }
    }

    pub(crate) fn progress(&mut self, transferred: u64) {
        if !self.started || self.finished || transferred < self.last {
            return;
        }
        self.last = transferred;
        if let Some(o) = &self.observer {
            o.progress(transferred, self.total);
        }
    }

    /// Known once streaming ends for unknown-size sources.
    pub(crate) fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    pub(crate) fn finish(&mut self) {
        if !self.started || self.finished {
            return;
        }
        self.finished = true;
        if let Some(o) = &self.observer {
            o.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl ProgressObserver for Events {
        fn start(&self) {
            self.0.lock().unwrap().push("start".into());
        }
        fn progress(&self, transferred: u64, _total: Option<u64>) {
            self.0.lock().unwrap().push(format!("p{transferred}"));
        }
        fn finish(&self) {
            self.0.lock().unwrap().push("finish".into());
        }
    }

    #[test]
    fn reporter_brackets_and_drops_regressions() {
        let events = Arc::new(Events::default());
        let mut r = ProgressReporter::new(Some(events.clone()), Some(10));
        r.progress(1); // before start: ignored
        r.start();
        r.start();
        r.progress(4);
        r.progress(3);
        r.progress(10);
        r.finish();
        r.finish();
        r.progress(11);
        assert_eq!(*events.0.lock().unwrap(), vec!["start", "p4", "p10", "finish"]);
    }

    #[test]
    fn finish_requires_start() {
        let events = Arc::new(Events::default());
        let mut r = ProgressReporter::new(Some(events.clone()), None);
        r.finish();
        assert!(events.0.lock().unwrap().is_empty());
    }

    #[test]
    fn closures_and_counters_observe() {
        let seen = Arc::new(AtomicU64::new(0));
        let s = seen.clone();
        let obs = progress_fn(move |n, _| s.store(n, Ordering::Relaxed));
        obs.progress(7, None);
        assert_eq!(seen.load(Ordering::Relaxed), 7);

        let counter = ProgressCounter::default();
        counter.start();
        counter.progress(5, Some(5));
        counter.finish();
        assert!(counter.started.load(Ordering::Relaxed));
        assert!(counter.finished.load(Ordering::Relaxed));
        assert_eq!(counter.bytes(), 5);
    }
}
