//! Remote content-addressable cache client.
//!
//! A build executor uses this crate to avoid re-executing work: action
//! outputs (files, stdout/stderr streams, whole action results) are stored
//! and fetched from a remote CAS by content digest, so identical content is
//! never transferred or stored twice. The crate provides:
//!
//! - **`RemoteCache`** - single-blob transfer engine with empty-content
//!   short-circuiting, a concurrency cap, and per-instance metrics
//! - **`TransferCoordinator`** - fan-out of an action's transfers into
//!   spawned tasks, waited in fail-fast or collect-all mode
//! - **`Materializer`** - byte writes or symlink materialization into a
//!   templated backing store
//! - **`StorageGateway`** - the capability trait a backend implements
//!   ([`InMemoryGateway`] is the map-backed test implementation)
//!
//! # Example
//!
//! ```ignore
//! use buildcache_remote::{CacheOptions, RemoteCache, TransferCoordinator};
//!
//! let cache = Arc::new(RemoteCache::new(gateway, CacheOptions::default()));
//! let coordinator = TransferCoordinator::new(Arc::clone(&cache));
//! let handles = coordinator.download_action_outputs(&ctx, &action_result, root);
//! wait_for_bulk_transfer(handles, false).await?;
//! ```

mod bulk;
mod engine;
mod error;
mod materialize;
mod memory;
mod metrics;
mod traits;
mod types;

pub use bulk::{wait_for_bulk_transfer, TransferCoordinator, TransferHandle};
pub use engine::RemoteCache;
pub use error::{BulkTransferError, CacheError, TransferFailure};
pub use materialize::Materializer;
pub use memory::InMemoryGateway;
pub use metrics::TransferMetrics;
pub use traits::StorageGateway;
pub use types::{
    ActionResult, CacheOptions, FileOutErr, OutputFile, RequestContext, UploadSource,
    DEFAULT_CAS_CONCURRENCY,
};
