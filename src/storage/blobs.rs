use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::Id;
use crate::Result;

#[derive(Debug, Clone)]
/// One file per resource id, named after the id's hex encoding.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> BlobStore {
        BlobStore { root: root.into() }
    }

    /// Create the root directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<BlobStore> {
        let store = Self::new(root);
        tokio::fs::create_dir_all(&store.root).await?;

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, id: &Id) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Replace the blob of `id`. Readers see either the previous or the new content.
    pub async fn write(&self, id: &Id, bytes: &[u8]) -> Result<()> {
        let path = self.path(id);
        let partial = partial_path(&path);

        tokio::fs::write(&partial, bytes).await?;

        if let Err(error) = tokio::fs::rename(&partial, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                debug!(?partial, ?cleanup, "Failed to remove partial blob");
            }
            return Err(error.into());
        }

        Ok(())
    }

    pub async fn read(&self, id: &Id) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(id)).await?)
    }

    /// Delete the blob of `id`, a missing blob is not an error.
    pub async fn remove(&self, id: &Id) -> Result<()> {
        match tokio::fs::remove_file(self.path(id)).await {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    path.with_extension("partial")
}
