//! Single-blob transfer operations against the remote store.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use buildcache_common::Digest;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::materialize::Materializer;
use crate::metrics::TransferMetrics;
use crate::traits::StorageGateway;
use crate::types::{CacheOptions, RequestContext};

/// Client for a remote content-addressable cache.
///
/// Orchestrates blob transfers against a [`StorageGateway`]: zero-length
/// content never touches the network, in-flight gateway calls are capped by
/// `cas_concurrency`, and every terminal transfer updates the instance's
/// [`TransferMetrics`] exactly once.
pub struct RemoteCache<G> {
    gateway: Arc<G>,
    materializer: Materializer,
    metrics: TransferMetrics,
    transfer_permits: Semaphore,
}

impl<G: StorageGateway> RemoteCache<G> {
    /// Create a cache client over the given gateway.
    ///
    /// # Arguments
    /// * `gateway` - Backend for find-missing/read/write calls
    /// * `options` - Symlink template and concurrency settings
    pub fn new(gateway: Arc<G>, options: CacheOptions) -> Self {
        let cas_concurrency: usize = options.cas_concurrency.max(1);
        Self {
            gateway,
            materializer: Materializer::new(options.symlink_template),
            metrics: TransferMetrics::new(),
            transfer_permits: Semaphore::new(cas_concurrency),
        }
    }

    /// Transfer counters of this instance.
    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    /// How downloaded files are turned into local artifacts.
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Fetch a blob into memory.
    ///
    /// An empty digest resolves to an empty byte sequence without
    /// contacting the gateway.
    pub async fn download_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
    ) -> Result<Vec<u8>, CacheError> {
        if digest.is_empty() {
            debug!(action_id = %ctx.action_id, %digest, "empty blob, skipping download");
            return Ok(Vec::new());
        }
        self.fetch_blob(ctx, digest).await
    }

    /// Fetch a blob and materialize it at `path`.
    ///
    /// With a symlink template configured, the destination becomes a
    /// symbolic link into the templated CAS location and no bytes cross the
    /// network. An empty digest materializes without a gateway call.
    pub async fn download_file(
        &self,
        ctx: &RequestContext,
        path: &Path,
        digest: &Digest,
    ) -> Result<(), CacheError> {
        if self.materializer.uses_symlinks() {
            debug!(action_id = %ctx.action_id, %digest, path = %path.display(),
                "materializing file as CAS symlink");
            return self.materializer.create_cas_symlink(path, digest).await;
        }
        if digest.is_empty() {
            debug!(action_id = %ctx.action_id, path = %path.display(),
                "empty file, skipping download");
            return self.materializer.write_empty_file(path).await;
        }

        let data: Vec<u8> = self.fetch_blob(ctx, digest).await?;
        self.materializer.write_file(path, &data).await
    }

    /// Store an in-memory blob remotely.
    ///
    /// Uploading zero bytes is a no-op by definition: every store already
    /// "has" the empty digest, so the call succeeds without a gateway call.
    pub async fn upload_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), CacheError> {
        if digest.is_empty() {
            debug!(action_id = %ctx.action_id, %digest, "empty blob, skipping upload");
            return Ok(());
        }
        self.store_blob(ctx, digest, data).await
    }

    /// Store a local file's contents remotely.
    ///
    /// A failure to read the file is a local I/O error, not a transfer
    /// failure.
    pub async fn upload_file(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
        path: &Path,
    ) -> Result<(), CacheError> {
        if digest.is_empty() {
            debug!(action_id = %ctx.action_id, path = %path.display(),
                "empty file, skipping upload");
            return Ok(());
        }

        let data: Vec<u8> = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::local_io(path.display().to_string(), e))?;
        self.store_blob(ctx, digest, &data).await
    }

    /// Ask the gateway which of `digests` it does not store yet.
    ///
    /// Empty digests are never reported missing: they require no storage
    /// and are stripped before the call. A query with nothing non-empty
    /// left resolves to the empty set without an RPC. Callers must upload
    /// only digests present in the result.
    pub async fn find_missing_digests(
        &self,
        ctx: &RequestContext,
        digests: &HashSet<Digest>,
    ) -> Result<HashSet<Digest>, CacheError> {
        let non_empty: HashSet<Digest> =
            digests.iter().filter(|d| !d.is_empty()).cloned().collect();
        if non_empty.is_empty() {
            return Ok(HashSet::new());
        }
        self.gateway.find_missing_blobs(ctx, &non_empty).await
    }

    /// Gateway read with permit and metrics accounting.
    async fn fetch_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
    ) -> Result<Vec<u8>, CacheError> {
        let _permit: SemaphorePermit<'_> = self.acquire_permit().await?;
        let result: Result<Vec<u8>, CacheError> = self.gateway.read_blob(ctx, digest).await;
        self.metrics.record_download(result.is_ok());
        match &result {
            Ok(data) => {
                debug!(action_id = %ctx.action_id, %digest, bytes = data.len(),
                    "downloaded blob");
            }
            Err(e) => {
                warn!(action_id = %ctx.action_id, %digest, error = %e, "download failed");
            }
        }
        result
    }

    /// Gateway write with permit and metrics accounting.
    async fn store_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let _permit: SemaphorePermit<'_> = self.acquire_permit().await?;
        let result: Result<(), CacheError> = self.gateway.write_blob(ctx, digest, data).await;
        self.metrics.record_upload(result.is_ok());
        match &result {
            Ok(()) => {
                debug!(action_id = %ctx.action_id, %digest, bytes = data.len(),
                    "uploaded blob");
            }
            Err(e) => {
                warn!(action_id = %ctx.action_id, %digest, error = %e, "upload failed");
            }
        }
        result
    }

    async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>, CacheError> {
        self.transfer_permits
            .acquire()
            .await
            .map_err(|e| CacheError::Transport {
                message: format!("transfer scheduler shut down: {e}"),
                retryable: false,
            })
    }
}
