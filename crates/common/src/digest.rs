//! Content digest computation.
//!
//! A digest is the pair of a content hash (rendered as lowercase hex) and
//! the content size in bytes. Everything in the remote cache is addressed
//! by digest rather than by name, so two equal byte sequences always map
//! to the same storage key.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Identifier of a blob: content hash plus size in bytes.
///
/// Two digests are equal iff both the hash and the size are equal. The
/// digest of zero-length content is a well-known constant per digest
/// function; use [`Digest::is_empty`] to detect it without comparing
/// hash strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    /// Content hash as a lowercase hex string.
    pub hash: String,
    /// Content size in bytes.
    pub size_bytes: u64,
}

impl Digest {
    /// Create a digest from a precomputed hash and size.
    pub fn new(hash: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            hash: hash.into(),
            size_bytes,
        }
    }

    /// True iff this digest identifies zero-length content.
    ///
    /// A zero-length input always hashes to the same constant for a given
    /// digest function, so the size alone decides emptiness.
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// Hash function used to derive digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestFunction {
    /// SHA-256 (cryptographic, 64 hex chars).
    #[default]
    Sha256,
    /// XXH128 (fast non-cryptographic, 32 hex chars).
    Xxh128,
}

impl DigestFunction {
    /// Hash a byte slice to a lowercase hex string.
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        match self {
            DigestFunction::Sha256 => hex::encode(Sha256::digest(data)),
            DigestFunction::Xxh128 => {
                let hash: u128 = xxhash_rust::xxh3::xxh3_128(data);
                format!("{:032x}", hash)
            }
        }
    }
}

/// Computes and compares content digests for one digest function.
///
/// The empty digest is computed once at construction and reused, so the
/// common empty-content case never re-hashes.
#[derive(Debug, Clone)]
pub struct DigestUtil {
    function: DigestFunction,
    empty: Digest,
}

impl DigestUtil {
    /// Create a digest util for the given function.
    pub fn new(function: DigestFunction) -> Self {
        let empty = Digest {
            hash: function.hash_bytes(&[]),
            size_bytes: 0,
        };
        Self { function, empty }
    }

    /// The digest function this util computes with.
    pub fn function(&self) -> DigestFunction {
        self.function
    }

    /// Compute the digest of a byte slice.
    ///
    /// Pure and deterministic: the same bytes always yield the same digest.
    pub fn compute(&self, data: &[u8]) -> Digest {
        if data.is_empty() {
            return self.empty.clone();
        }
        Digest {
            hash: self.function.hash_bytes(data),
            size_bytes: data.len() as u64,
        }
    }

    /// Compute the digest of a file without loading it into memory at once.
    ///
    /// # Arguments
    /// * `path` - Path to the file to digest
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn compute_file(&self, path: &Path) -> Result<Digest, std::io::Error> {
        let mut file: std::fs::File = std::fs::File::open(path)?;
        let mut buffer: Vec<u8> = vec![0u8; 64 * 1024];
        let mut size_bytes: u64 = 0;

        match self.function {
            DigestFunction::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let bytes_read: usize = file.read(&mut buffer)?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                    size_bytes += bytes_read as u64;
                }
                if size_bytes == 0 {
                    return Ok(self.empty.clone());
                }
                Ok(Digest {
                    hash: hex::encode(hasher.finalize()),
                    size_bytes,
                })
            }
            DigestFunction::Xxh128 => {
                let mut hasher = xxhash_rust::xxh3::Xxh3::new();
                loop {
                    let bytes_read: usize = file.read(&mut buffer)?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                    size_bytes += bytes_read as u64;
                }
                if size_bytes == 0 {
                    return Ok(self.empty.clone());
                }
                Ok(Digest {
                    hash: format!("{:032x}", hasher.digest128()),
                    size_bytes,
                })
            }
        }
    }

    /// The well-known digest of zero-length content.
    pub fn empty_digest(&self) -> &Digest {
        &self.empty
    }

    /// True iff `digest` identifies zero-length content.
    pub fn is_empty(&self, digest: &Digest) -> bool {
        digest.is_empty()
    }
}

impl Default for DigestUtil {
    fn default() -> Self {
        Self::new(DigestFunction::default())
    }
}
