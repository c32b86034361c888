//! Transfer counters for one cache client instance.

use std::sync::atomic::{AtomicU64, Ordering};

/// Increment-only counters over the lifetime of one cache client.
///
/// Every terminal gateway transfer increments exactly one counter exactly
/// once. Short-circuited empty-content transfers and symlink
/// materializations touch no counter: they are not real transfers.
/// Constructing a new client resets the counts.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    successful_downloads: AtomicU64,
    failed_downloads: AtomicU64,
    successful_uploads: AtomicU64,
    failed_uploads: AtomicU64,
}

impl TransferMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal outcome of one download.
    pub fn record_download(&self, success: bool) {
        if success {
            self.successful_downloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_downloads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the terminal outcome of one upload.
    pub fn record_upload(&self, success: bool) {
        if success {
            self.successful_uploads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_uploads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of downloads that completed successfully.
    pub fn successful_downloads(&self) -> u64 {
        self.successful_downloads.load(Ordering::Relaxed)
    }

    /// Number of downloads that reached a terminal failure.
    pub fn failed_downloads(&self) -> u64 {
        self.failed_downloads.load(Ordering::Relaxed)
    }

    /// Number of uploads that completed successfully.
    pub fn successful_uploads(&self) -> u64 {
        self.successful_uploads.load(Ordering::Relaxed)
    }

    /// Number of uploads that reached a terminal failure.
    pub fn failed_uploads(&self) -> u64 {
        self.failed_uploads.load(Ordering::Relaxed)
    }
}
