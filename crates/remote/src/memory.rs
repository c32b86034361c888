//! Map-backed gateway for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use buildcache_common::Digest;

use crate::error::CacheError;
use crate::traits::StorageGateway;
use crate::types::RequestContext;

/// In-memory [`StorageGateway`] backed by a digest-keyed map.
///
/// Counts the calls it receives so tests can assert that short-circuited
/// operations issued zero RPCs.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    find_missing_calls: AtomicU64,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
}

impl InMemoryGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gateway pre-populated with the given blobs.
    pub fn with_blobs(blobs: HashMap<Digest, Vec<u8>>) -> Self {
        Self {
            blobs: Mutex::new(blobs),
            ..Self::default()
        }
    }

    /// Store a blob directly, bypassing call counters.
    pub fn insert(&self, digest: Digest, data: Vec<u8>) {
        self.blobs
            .lock()
            .expect("blob map lock poisoned")
            .insert(digest, data);
    }

    /// True iff the gateway currently stores `digest`.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.blobs
            .lock()
            .expect("blob map lock poisoned")
            .contains_key(digest)
    }

    /// Number of find-missing RPCs received.
    pub fn find_missing_calls(&self) -> u64 {
        self.find_missing_calls.load(Ordering::Relaxed)
    }

    /// Number of read RPCs received.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// Number of write RPCs received.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageGateway for InMemoryGateway {
    async fn find_missing_blobs(
        &self,
        _ctx: &RequestContext,
        digests: &HashSet<Digest>,
    ) -> Result<HashSet<Digest>, CacheError> {
        self.find_missing_calls.fetch_add(1, Ordering::Relaxed);
        let blobs = self.blobs.lock().expect("blob map lock poisoned");
        Ok(digests
            .iter()
            .filter(|d| !blobs.contains_key(d))
            .cloned()
            .collect())
    }

    async fn read_blob(
        &self,
        _ctx: &RequestContext,
        digest: &Digest,
    ) -> Result<Vec<u8>, CacheError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let blobs = self.blobs.lock().expect("blob map lock poisoned");
        blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| CacheError::NotFound {
                digest: digest.clone(),
            })
    }

    async fn write_blob(
        &self,
        _ctx: &RequestContext,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), CacheError> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        self.blobs
            .lock()
            .expect("blob map lock poisoned")
            .insert(digest.clone(), data.to_vec());
        Ok(())
    }
}
