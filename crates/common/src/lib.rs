//! Shared types for the buildcache client.
//!
//! This crate provides the content-digest model used across all buildcache
//! crates:
//! - The `Digest` identifier (content hash + size)
//! - Pluggable digest functions (SHA-256, XXH128)
//! - `DigestUtil` for computing digests of bytes and files

pub mod digest;

// Re-export commonly used items at crate root
pub use digest::{Digest, DigestFunction, DigestUtil};
