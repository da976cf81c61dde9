//! Throttled download progress reporting

use std::sync::Arc;
use std::time::{Duration, Instant};

/// One progress report
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    /// From `Content-Length`, when the server sent one
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
    /// Bytes per second since the previous report
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

/// Progress callback
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Turns raw byte counts into reports, emitting at most once per interval
pub(crate) struct ProgressTracker {
    callback: Option<ProgressCallback>,
    interval: Duration,
    total_bytes: Option<u64>,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Option<ProgressCallback>,
        interval: Duration,
        total_bytes: Option<u64>,
    ) -> Self {
        Self {
            callback,
            interval,
            total_bytes,
            last_emit: Instant::now(),
            last_bytes: 0,
        }
    }

    /// Record the running total; reports only if the interval has elapsed
    pub(crate) fn update(&mut self, downloaded: u64) {
        let now = Instant::now();
        if now.duration_since(self.last_emit) >= self.interval {
            self.emit(downloaded, now);
        }
    }

    /// Unconditional last report
    pub(crate) fn finish(&mut self, downloaded: u64) {
        self.emit(downloaded, Instant::now());
    }

    fn emit(&mut self, downloaded: u64, now: Instant) {
        let Some(callback) = &self.callback else {
            return;
        };

        let elapsed = now.duration_since(self.last_emit).as_secs_f64();
        let delta = downloaded.saturating_sub(self.last_bytes);
        let bytes_per_second = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };

        let percent = self
            .total_bytes
            .filter(|total| *total > 0)
            .map(|total| (downloaded as f64 / total as f64 * 100.0).min(100.0));

        let eta = match self.total_bytes {
            Some(total) if bytes_per_second > 0.0 => {
                let remaining = total.saturating_sub(downloaded) as f64;
                Some(Duration::from_secs_f64(remaining / bytes_per_second))
            }
            _ => None,
        };

        callback(DownloadProgress {
            downloaded_bytes: downloaded,
            total_bytes: self.total_bytes,
            percent,
            bytes_per_second,
            eta,
        });

        self.last_emit = now;
        self.last_bytes = downloaded;
    }
}
