//! Gateway trait for the remote content-addressable store.

use std::collections::HashSet;

use async_trait::async_trait;
use buildcache_common::Digest;

use crate::error::CacheError;
use crate::types::RequestContext;

/// Capability set of the remote CAS, implemented by each backend.
///
/// The production implementation wraps the network transport (including its
/// retry and auth layers); tests inject [`crate::InMemoryGateway`]. The
/// gateway must be safe for concurrent use by multiple in-flight calls.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Report which of the given digests are not stored remotely.
    ///
    /// Callers upload only digests present in the result; content the
    /// store already has never crosses the network again.
    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &HashSet<Digest>,
    ) -> Result<HashSet<Digest>, CacheError>;

    /// Fetch the blob identified by `digest`.
    ///
    /// Fails with [`CacheError::NotFound`] if the digest is absent.
    async fn read_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
    ) -> Result<Vec<u8>, CacheError>;

    /// Store `data` under `digest`.
    ///
    /// Idempotent: re-writing identical content under the same digest is a
    /// no-op success.
    async fn write_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), CacheError>;
}
