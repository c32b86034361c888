//! Turning fetched blobs into local filesystem artifacts.

use std::path::Path;

use buildcache_common::Digest;

use crate::error::CacheError;

/// Materializes downloaded content, either by writing bytes or by linking
/// into a templated backing store.
///
/// The symlink template is an instance-wide policy: when set, every file
/// download of the session is materialized as a symbolic link and no bytes
/// are copied. The actual content is assumed to reside at the templated
/// location, e.g. a separately mounted view of the CAS.
#[derive(Debug, Clone, Default)]
pub struct Materializer {
    symlink_template: Option<String>,
}

impl Materializer {
    /// Create a materializer, optionally with a symlink template containing
    /// `{hash}` and `{size_bytes}` placeholders.
    pub fn new(symlink_template: Option<String>) -> Self {
        Self { symlink_template }
    }

    /// True iff file downloads are materialized as symlinks.
    pub fn uses_symlinks(&self) -> bool {
        self.symlink_template.is_some()
    }

    /// Render the symlink target for `digest`, if a template is set.
    ///
    /// `{hash}` substitutes the digest's lowercase hex hash and
    /// `{size_bytes}` its decimal size.
    pub fn symlink_target(&self, digest: &Digest) -> Option<String> {
        self.symlink_template.as_ref().map(|template| {
            template
                .replace("{hash}", &digest.hash)
                .replace("{size_bytes}", &digest.size_bytes.to_string())
        })
    }

    /// Write blob bytes to `path`, creating parent directories as needed.
    ///
    /// On success the file holds exactly the given bytes. A destination of
    /// an incompatible kind (e.g. an existing directory) surfaces as a
    /// local I/O error.
    pub async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), CacheError> {
        create_parent_dirs(path).await?;
        tokio::fs::write(path, data)
            .await
            .map_err(|e| CacheError::local_io(path.display().to_string(), e))
    }

    /// Ensure `path` exists as a zero-length file.
    pub async fn write_empty_file(&self, path: &Path) -> Result<(), CacheError> {
        self.write_file(path, &[]).await
    }

    /// Create `path` as a symlink to the templated CAS location of
    /// `digest`. No bytes are copied.
    ///
    /// An existing symlink at `path` is replaced.
    pub async fn create_cas_symlink(
        &self,
        path: &Path,
        digest: &Digest,
    ) -> Result<(), CacheError> {
        let target: String = match self.symlink_target(digest) {
            Some(target) => target,
            None => {
                return Err(CacheError::InvalidConfig {
                    message: "symlink materialization requested without a template".into(),
                })
            }
        };

        create_parent_dirs(path).await?;

        // Replace a stale link from an earlier materialization.
        if path.is_symlink() {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| CacheError::local_io(path.display().to_string(), e))?;
        }

        create_symlink(&target, path).await
    }

    /// Add execute permission bits mirroring the read bits (Unix only).
    #[cfg(unix)]
    pub async fn set_executable(&self, path: &Path) -> Result<(), CacheError> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| CacheError::local_io(path.display().to_string(), e))?;

        let mut perms = metadata.permissions();
        let mode: u32 = perms.mode();
        perms.set_mode(mode | ((mode & 0o444) >> 2));

        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| CacheError::local_io(path.display().to_string(), e))
    }

    #[cfg(not(unix))]
    pub async fn set_executable(&self, _path: &Path) -> Result<(), CacheError> {
        // No-op on non-Unix platforms.
        Ok(())
    }
}

async fn create_parent_dirs(path: &Path) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::local_io(parent.display().to_string(), e))?;
    }
    Ok(())
}

#[cfg(unix)]
async fn create_symlink(target: &str, link: &Path) -> Result<(), CacheError> {
    tokio::fs::symlink(target, link)
        .await
        .map_err(|e| CacheError::local_io(link.display().to_string(), e))
}

#[cfg(windows)]
async fn create_symlink(target: &str, link: &Path) -> Result<(), CacheError> {
    tokio::fs::symlink_file(target, link)
        .await
        .map_err(|e| CacheError::local_io(link.display().to_string(), e))
}
