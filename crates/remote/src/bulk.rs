//! Fan-out and aggregation of related transfers.
//!
//! A bulk transfer treats a set of individual transfers (e.g. every
//! declared output of an action, or its stdout and stderr streams) as one
//! logical unit of success or failure. Each constituent transfer runs as a
//! spawned task; the waiter composes the task handles and decides between
//! returning on the first failure or collecting every outcome.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use buildcache_common::Digest;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::RemoteCache;
use crate::error::{BulkTransferError, CacheError, TransferFailure};
use crate::traits::StorageGateway;
use crate::types::{ActionResult, FileOutErr, RequestContext, UploadSource};

/// A named, in-flight transfer.
///
/// Dropping a handle detaches the underlying task rather than cancelling
/// it: the transfer runs to its terminal state in the background and still
/// updates the instance metrics when it does.
#[derive(Debug)]
pub struct TransferHandle {
    name: String,
    task: JoinHandle<Result<(), CacheError>>,
}

impl TransferHandle {
    /// Spawn a transfer task under the given name.
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            task: tokio::spawn(future),
        }
    }

    /// Name of the transfer (output path, stream name, or digest).
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn join(self) -> (String, Result<(), CacheError>) {
        let result: Result<(), CacheError> = match self.task.await {
            Ok(result) => result,
            // The task never reached a terminal transfer state.
            Err(e) => Err(CacheError::Transport {
                message: format!("transfer task failed: {e}"),
                retryable: false,
            }),
        };
        (self.name, result)
    }
}

/// Block until the bulk transfer reaches a terminal state.
///
/// With `fail_fast`, the first observed failure is returned immediately
/// and the remaining handles are dropped; their transfers keep running in
/// the background. Without it, every transfer is awaited and the aggregate
/// error reports all collected failures, not just the first. An empty
/// handle set completes successfully at once.
pub async fn wait_for_bulk_transfer(
    handles: Vec<TransferHandle>,
    fail_fast: bool,
) -> Result<(), BulkTransferError> {
    let mut pending: FuturesUnordered<_> =
        handles.into_iter().map(TransferHandle::join).collect();

    let mut failures: Vec<TransferFailure> = Vec::new();
    while let Some((name, result)) = pending.next().await {
        if let Err(error) = result {
            if fail_fast {
                return Err(BulkTransferError::single(name, error));
            }
            failures.push(TransferFailure::new(name, error));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(BulkTransferError { failures })
    }
}

/// Drives the related transfers of one action through the cache client.
pub struct TransferCoordinator<G> {
    cache: Arc<RemoteCache<G>>,
}

impl<G: StorageGateway + 'static> TransferCoordinator<G> {
    /// Create a coordinator over the given cache client.
    pub fn new(cache: Arc<RemoteCache<G>>) -> Self {
        Self { cache }
    }

    /// The cache client this coordinator fans out to.
    pub fn cache(&self) -> &Arc<RemoteCache<G>> {
        &self.cache
    }

    /// Start downloads of an action's stdout and stderr streams.
    ///
    /// Builds at most two transfers. Empty or absent digests are resolved
    /// without any I/O; non-empty streams are fetched concurrently and
    /// written to the sink's paths. Returns the handles for composition
    /// with [`wait_for_bulk_transfer`].
    pub fn download_out_err(
        &self,
        ctx: &RequestContext,
        result: &ActionResult,
        out_err: &FileOutErr,
    ) -> Vec<TransferHandle> {
        let mut handles: Vec<TransferHandle> = Vec::new();
        let streams = [
            ("stdout", &result.stdout_digest, &out_err.stdout),
            ("stderr", &result.stderr_digest, &out_err.stderr),
        ];
        for (name, digest, path) in streams {
            let Some(digest) = digest else { continue };
            if digest.is_empty() {
                debug!(action_id = %ctx.action_id, stream = name, "empty stream, nothing to fetch");
                continue;
            }
            handles.push(self.spawn_stream_download(ctx, name, digest.clone(), path.clone()));
        }
        handles
    }

    /// Start downloads of every output file an action declared.
    ///
    /// One transfer per output, materialized at `root`/`output.path`. The
    /// executable bit is applied after byte materialization; in symlink
    /// mode permissions belong to the backing store and are left alone.
    pub fn download_action_outputs(
        &self,
        ctx: &RequestContext,
        result: &ActionResult,
        root: &Path,
    ) -> Vec<TransferHandle> {
        let mut handles: Vec<TransferHandle> = Vec::new();
        for output in &result.output_files {
            let cache: Arc<RemoteCache<G>> = Arc::clone(&self.cache);
            let ctx: RequestContext = ctx.clone();
            let digest: Digest = output.digest.clone();
            let executable: bool = output.executable;
            let dest: PathBuf = root.join(&output.path);

            handles.push(TransferHandle::spawn(output.path.clone(), async move {
                cache.download_file(&ctx, &dest, &digest).await?;
                if executable && !cache.materializer().uses_symlinks() {
                    cache.materializer().set_executable(&dest).await?;
                }
                Ok(())
            }));
        }
        handles
    }

    /// Upload the given blobs, skipping content the store already has.
    ///
    /// One find-missing round decides what actually crosses the network;
    /// only missing digests are uploaded, concurrently, and every failure
    /// is collected before reporting.
    pub async fn upload_missing(
        &self,
        ctx: &RequestContext,
        items: Vec<(Digest, UploadSource)>,
    ) -> Result<(), BulkTransferError> {
        let digests: HashSet<Digest> = items.iter().map(|(d, _)| d.clone()).collect();
        let missing: HashSet<Digest> = self
            .cache
            .find_missing_digests(ctx, &digests)
            .await
            .map_err(|e| BulkTransferError::single("find-missing", e))?;

        let mut handles: Vec<TransferHandle> = Vec::new();
        for (digest, source) in items {
            if !missing.contains(&digest) {
                continue;
            }
            let cache: Arc<RemoteCache<G>> = Arc::clone(&self.cache);
            let ctx: RequestContext = ctx.clone();
            let name: String = match &source {
                UploadSource::File(path) => path.display().to_string(),
                UploadSource::Bytes(_) => digest.to_string(),
            };
            handles.push(TransferHandle::spawn(name, async move {
                match source {
                    UploadSource::File(path) => cache.upload_file(&ctx, &digest, &path).await,
                    UploadSource::Bytes(data) => cache.upload_blob(&ctx, &digest, &data).await,
                }
            }));
        }

        wait_for_bulk_transfer(handles, false).await
    }

    fn spawn_stream_download(
        &self,
        ctx: &RequestContext,
        name: &str,
        digest: Digest,
        path: PathBuf,
    ) -> TransferHandle {
        let cache: Arc<RemoteCache<G>> = Arc::clone(&self.cache);
        let ctx: RequestContext = ctx.clone();
        TransferHandle::spawn(name, async move {
            let data: Vec<u8> = cache.download_blob(&ctx, &digest).await?;
            cache.materializer().write_file(&path, &data).await
        })
    }
}
