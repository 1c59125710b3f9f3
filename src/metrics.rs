// Session metrics module
//
// Lightweight counters describing what a session did, logged when it closes

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for one controller
///
/// Uses atomic operations so a shared reference can be handed to whoever
/// reports on the session without locking.
#[derive(Debug)]
pub struct SessionMetrics {
    /// Folders that reached `Ready`
    pub folders_opened: AtomicUsize,

    /// Pictures decoded into the cache
    pub images_decoded: AtomicU64,

    /// Pictures evicted from the cache by `prepare`
    pub images_evicted: AtomicU64,

    /// Total decode time in milliseconds
    pub total_decode_time_ms: AtomicU64,

    /// Sidecar writes that succeeded
    pub saves: AtomicU64,

    /// Sidecar writes that failed
    pub save_failures: AtomicU64,

    /// Sidecar backups taken before bulk changes
    pub backups: AtomicU64,

    /// Files copied by exports
    pub files_exported: AtomicU64,

    /// Files that reached their capture-date name
    pub files_renamed: AtomicU64,

    start_time: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            folders_opened: AtomicUsize::new(0),
            images_decoded: AtomicU64::new(0),
            images_evicted: AtomicU64::new(0),
            total_decode_time_ms: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            backups: AtomicU64::new(0),
            files_exported: AtomicU64::new(0),
            files_renamed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_folder_opened(&self) {
        self.folders_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one cache preparation
    pub fn record_prepare(&self, decoded: usize, evicted: usize, duration: Duration) {
        self.images_decoded.fetch_add(decoded as u64, Ordering::Relaxed);
        self.images_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        if decoded > 0 {
            self.total_decode_time_ms
                .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        }
    }

    pub fn record_save(&self, backup: bool) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        if backup {
            self.backups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exported(&self, files: usize) {
        self.files_exported.fetch_add(files as u64, Ordering::Relaxed);
    }

    pub fn record_renamed(&self, files: usize) {
        self.files_renamed.fetch_add(files as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average decode time per picture in milliseconds
    pub fn avg_decode_time_ms(&self) -> f64 {
        let total = self.total_decode_time_ms.load(Ordering::Relaxed);
        let count = self.images_decoded.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Session Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Folders opened: {}",
            self.folders_opened.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Cache: {} decoded, {} evicted (avg: {:.2}ms per decode)",
            self.images_decoded.load(Ordering::Relaxed),
            self.images_evicted.load(Ordering::Relaxed),
            self.avg_decode_time_ms()
        );
        tracing::info!(
            "Progress saves: {}, backups: {}, failures: {}",
            self.saves.load(Ordering::Relaxed),
            self.backups.load(Ordering::Relaxed),
            self.save_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Files exported: {}, renamed: {}",
            self.files_exported.load(Ordering::Relaxed),
            self.files_renamed.load(Ordering::Relaxed)
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
