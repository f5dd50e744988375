//! Oversized attachment storage.
//!
//! Attachments too large for a case record are written under a local
//! directory that a web server exposes at the configured URL prefix.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::StorageError;

/// Persists oversized attachment payloads.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Write `bytes` at `relative_path` (`/`-separated) below the store root.
    async fn persist(&self, relative_path: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// [`AttachmentStore`] rooted at a local directory.
pub struct FsAttachmentStore {
    base_path: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Resolve a relative path, refusing anything that would leave the root.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(relative.display().to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn persist(&self, relative_path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full_path = self.resolve_path(relative_path)?;
        let write_error = |source| StorageError::Write {
            path: full_path.display().to_string(),
            source,
        };
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        fs::write(&full_path, bytes).await.map_err(write_error)?;
        debug!(path = %full_path.display(), bytes = bytes.len(), "Oversized attachment stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn persists_under_dated_directory() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path().to_path_buf());
        store
            .persist("20240307/20240307_090501000_photo.png", b"png")
            .await
            .unwrap();
        let written = std::fs::read(dir.path().join("20240307/20240307_090501000_photo.png")).unwrap();
        assert_eq!(written, b"png");
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path().to_path_buf());
        for bad in ["../outside.bin", "/etc/passwd", ""] {
            let err = store.persist(bad, b"x").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{bad}");
        }
    }
}
