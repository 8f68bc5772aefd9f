// Pipeline metrics module
//
// Lightweight counters for what the pipeline did over a process lifetime

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide pipeline metrics
///
/// Uses atomic operations for thread-safe tracking without locks. Shared by
/// the orchestrator and its runs through an `Arc`, and logged once at the
/// end of a CLI command.
#[derive(Debug)]
pub struct Metrics {
    /// Pipeline runs started
    pub runs_started: AtomicUsize,

    /// Runs that reached Complete
    pub runs_completed: AtomicUsize,

    /// Runs that reached Failed
    pub runs_failed: AtomicUsize,

    /// Files copied into the destination layout
    pub files_relocated: AtomicUsize,

    /// Relocation categories absent from the checkout
    pub categories_skipped: AtomicUsize,

    /// Single files downloaded successfully
    pub files_fetched: AtomicUsize,

    /// Single file downloads that failed
    pub fetch_failures: AtomicUsize,

    /// Scratch directories that could not be removed
    pub cleanup_warnings: AtomicUsize,

    /// Time spent inside the clone subprocess, in milliseconds
    pub total_clone_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicUsize::new(0),
            runs_completed: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            files_relocated: AtomicUsize::new(0),
            categories_skipped: AtomicUsize::new(0),
            files_fetched: AtomicUsize::new(0),
            fetch_failures: AtomicUsize::new(0),
            cleanup_warnings: AtomicUsize::new(0),
            total_clone_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one relocation pass
    pub fn record_relocation(&self, files: usize, skipped: usize) {
        self.files_relocated.fetch_add(files, Ordering::Relaxed);
        self.categories_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_file_fetched(&self) {
        self.files_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failed(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_warning(&self) {
        self.cleanup_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clone_time(&self, duration: Duration) {
        self.total_clone_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average clone duration per started run, in milliseconds
    pub fn avg_clone_time_ms(&self) -> f64 {
        let total = self.total_clone_time_ms.load(Ordering::Relaxed);
        let count = self.runs_started.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Pipeline Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Runs: {} started, {} completed, {} failed",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_completed.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Relocation: {} files placed, {} categories skipped",
            self.files_relocated.load(Ordering::Relaxed),
            self.categories_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Fetches: {} succeeded, {} failed",
            self.files_fetched.load(Ordering::Relaxed),
            self.fetch_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Clone time: {:.2}s (avg: {:.2}ms per run), cleanup warnings: {}",
            self.total_clone_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_clone_time_ms(),
            self.cleanup_warnings.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.runs_started.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.files_fetched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_run_outcomes() {
        let metrics = Metrics::new();

        metrics.record_run_started();
        metrics.record_run_started();
        metrics.record_run_completed();
        metrics.record_run_failed();

        assert_eq!(metrics.runs_started.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.runs_completed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.runs_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_relocation_and_fetch_counters() {
        let metrics = Metrics::new();

        metrics.record_relocation(12, 3);
        metrics.record_relocation(4, 0);
        metrics.record_file_fetched();
        metrics.record_fetch_failed();
        metrics.record_cleanup_warning();

        assert_eq!(metrics.files_relocated.load(Ordering::Relaxed), 16);
        assert_eq!(metrics.categories_skipped.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.files_fetched.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.fetch_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.cleanup_warnings.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_avg_clone_time() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_clone_time_ms(), 0.0);

        metrics.record_run_started();
        metrics.record_clone_time(Duration::from_millis(100));
        metrics.record_run_started();
        metrics.record_clone_time(Duration::from_millis(300));

        assert_eq!(metrics.avg_clone_time_ms(), 200.0);
    }
}
