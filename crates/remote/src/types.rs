//! Shared data structures for remote cache operations.

use std::path::PathBuf;

use buildcache_common::Digest;
use serde::{Deserialize, Serialize};

/// Default cap on simultaneous in-flight gateway transfers.
pub const DEFAULT_CAS_CONCURRENCY: usize = 10;

/// Correlation metadata threaded through every gateway call.
///
/// Forwarded for tracing and auth on the wire; never inspected for
/// correctness by the cache client itself.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Identity of the action this transfer belongs to.
    pub action_id: String,
    /// Tracing id correlating all calls of one logical operation.
    pub trace_id: String,
}

impl RequestContext {
    /// Create a new request context.
    pub fn new(action_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            trace_id: trace_id.into(),
        }
    }
}

/// Configuration for a cache client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// When set, file downloads create symbolic links into this templated
    /// location (placeholders `{hash}` and `{size_bytes}`) instead of
    /// copying bytes. Applies uniformly to every file download of the
    /// instance.
    pub symlink_template: Option<String>,
    /// Maximum simultaneous in-flight gateway transfers. Clamped to >= 1.
    pub cas_concurrency: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            symlink_template: None,
            cas_concurrency: DEFAULT_CAS_CONCURRENCY,
        }
    }
}

impl CacheOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the symlink template for file downloads.
    pub fn with_symlink_template(mut self, template: impl Into<String>) -> Self {
        self.symlink_template = Some(template.into());
        self
    }

    /// Set the cap on simultaneous in-flight transfers.
    pub fn with_cas_concurrency(mut self, cas_concurrency: usize) -> Self {
        self.cas_concurrency = cas_concurrency;
        self
    }
}

/// Result of one executed action, as declared by the remote store.
///
/// Carries the digests needed to restore the action's outputs locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    /// Output files the action declared, with their content digests.
    pub output_files: Vec<OutputFile>,
    /// Digest of the captured stdout stream, if any.
    pub stdout_digest: Option<Digest>,
    /// Digest of the captured stderr stream, if any.
    pub stderr_digest: Option<Digest>,
    /// Exit code of the action.
    pub exit_code: i32,
}

/// One declared output file of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    /// Path relative to the action's output root.
    pub path: String,
    /// Content digest of the file.
    pub digest: Digest,
    /// Whether the file should carry the executable bit.
    pub executable: bool,
}

impl OutputFile {
    /// Create a non-executable output file entry.
    pub fn new(path: impl Into<String>, digest: Digest) -> Self {
        Self {
            path: path.into(),
            digest,
            executable: false,
        }
    }

    /// Mark the output as executable.
    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }
}

/// Source of data for an upload.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Read from file at path.
    File(PathBuf),
    /// In-memory bytes.
    Bytes(Vec<u8>),
}

/// File-backed sink for an action's stdout and stderr streams.
#[derive(Debug, Clone)]
pub struct FileOutErr {
    /// Destination for the stdout stream.
    pub stdout: PathBuf,
    /// Destination for the stderr stream.
    pub stderr: PathBuf,
}

impl FileOutErr {
    /// Create a sink writing to the two given paths.
    pub fn new(stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}
