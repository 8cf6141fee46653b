//! Filesystem-backed image store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;
use tokio::fs;

use super::traits::BlobStore;
use crate::error::{Result, VizregError};

/// Stores images as files under a root directory.
///
/// Writes land in a temporary sibling first and are renamed into place, so a
/// reader sees either the old file or the complete new one.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative blob path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(VizregError::Storage(format!("invalid blob path: {}", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let suffix: u32 = rand::rng().random();
        let mut tmp_name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(format!(".{:08x}.tmp", suffix));
        let tmp = target.with_file_name(tmp_name);

        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        log::debug!("Wrote {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }

    async fn read(&self, path: &str) -> Option<Vec<u8>> {
        let target = match self.resolve(path) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Refusing to read {}: {}", path, e);
                return None;
            }
        };
        match fs::read(&target).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::debug!("Image {} unavailable: {}", target.display(), e);
                None
            }
        }
    }

    async fn delete(&self, path: &str) {
        let target = match self.resolve(path) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Refusing to delete {}: {}", path, e);
                return;
            }
        };
        match fs::remove_file(&target).await {
            Ok(()) => log::debug!("Deleted {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete {}: {}", target.display(), e),
        }
    }
}
