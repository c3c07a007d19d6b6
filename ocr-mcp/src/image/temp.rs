use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

const FILE_PREFIX: &str = "ocr-";

/// A local image ready for the engine.
///
/// Temporary images are deleted on [`ResolvedImage::release`] or on drop,
/// whichever comes first. Caller-owned files are never touched.
#[derive(Debug)]
pub struct ResolvedImage {
    path: PathBuf,
    temp_root: Option<PathBuf>,
    released: bool,
}

impl ResolvedImage {
    /// Wrap a caller-owned file.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp_root: None,
            released: false,
        }
    }

    pub(crate) fn temporary(path: PathBuf, temp_root: PathBuf) -> Self {
        Self {
            path,
            temp_root: Some(temp_root),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_root.is_some()
    }

    /// Delete the backing file if this image is temporary. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let Some(root) = &self.temp_root else {
            return;
        };

        if !is_inside(root, &self.path) {
            warn!(
                path = %self.path.display(),
                root = %root.display(),
                "Refusing to delete file outside the temp root"
            );
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary image"),
        }
    }
}

impl Drop for ResolvedImage {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_inside(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && path != root
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

/// Writes uniquely named files below the temp root.
#[derive(Debug, Clone)]
pub struct TempStore {
    root: PathBuf,
}

impl TempStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to a fresh `ocr-<uuid>.<extension>` file.
    ///
    /// The returned handle owns the file from the moment it is created, so a
    /// failed write leaves nothing behind.
    pub async fn write(&self, bytes: &[u8], extension: &str) -> Result<ResolvedImage> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self
            .root
            .join(format!("{FILE_PREFIX}{}.{extension}", Uuid::new_v4().simple()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let image = ResolvedImage::temporary(path, self.root.clone());

        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;

        debug!(path = %image.path().display(), bytes = bytes.len(), "Wrote temporary image");
        Ok(image)
    }
}
