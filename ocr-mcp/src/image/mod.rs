//! Image input resolution
//!
//! Turns the `image` argument of a tool call into a local file the OCR engine
//! can read. Three forms are accepted and told apart purely by prefix, in
//! this order:
//!
//! 1. `data:image/<type>;base64,<payload>` - decoded into a temporary file
//! 2. `http://` / `https://` URLs - downloaded into a temporary file
//! 3. anything else - used verbatim as a local path
//!
//! Temporary files live under the configured temp root with unique names and
//! are removed when the [`ResolvedImage`] is released or dropped.

mod inline;
mod remote;
mod temp;

pub use inline::{decode_data_url, extension_for_mime, inline_extension, InlineImage};
pub use remote::{DownloadedImage, ImageDownloader};
pub use temp::{ResolvedImage, TempStore};

use std::path::PathBuf;
use tracing::debug;
use url::Url;

use crate::config::{DownloadConfig, TempConfig};
use crate::error::{OcrMcpError, Result};

use inline::DATA_URL_PREFIX;

/// Syntactic class of an `image` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    InlineData,
    RemoteUrl,
    LocalPath,
}

impl SourceKind {
    pub fn classify(raw: &str) -> Self {
        if raw.starts_with(DATA_URL_PREFIX) {
            SourceKind::InlineData
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            SourceKind::RemoteUrl
        } else {
            SourceKind::LocalPath
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    InlineData { mime_type: String, raw_bytes: Vec<u8> },
    LocalPath { path: PathBuf },
    RemoteUrl { url: Url },
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self> {
        match SourceKind::classify(raw) {
            SourceKind::InlineData => {
                let InlineImage { mime_type, bytes } = decode_data_url(raw)?;
                Ok(ImageReference::InlineData {
                    mime_type,
                    raw_bytes: bytes,
                })
            }
            SourceKind::RemoteUrl => {
                let url = Url::parse(raw)
                    .map_err(|e| OcrMcpError::InvalidFormat(format!("invalid URL '{raw}': {e}")))?;
                Ok(ImageReference::RemoteUrl { url })
            }
            SourceKind::LocalPath => {
                if raw.trim().is_empty() {
                    return Err(OcrMcpError::InvalidFormat(
                        "image path is empty".to_string(),
                    ));
                }
                Ok(ImageReference::LocalPath {
                    path: PathBuf::from(raw),
                })
            }
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            ImageReference::InlineData { .. } => SourceKind::InlineData,
            ImageReference::LocalPath { .. } => SourceKind::LocalPath,
            ImageReference::RemoteUrl { .. } => SourceKind::RemoteUrl,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageResolver {
    store: TempStore,
    downloader: ImageDownloader,
}

impl ImageResolver {
    pub fn new(download: &DownloadConfig, temp: &TempConfig) -> Result<Self> {
        Ok(Self {
            store: TempStore::new(temp.root.clone()),
            downloader: ImageDownloader::new(download)?,
        })
    }

    pub fn temp_root(&self) -> &std::path::Path {
        self.store.root()
    }

    pub async fn resolve(&self, raw: &str) -> Result<ResolvedImage> {
        let reference = ImageReference::parse(raw)?;
        debug!(kind = ?reference.kind(), "Resolving image argument");

        match reference {
            ImageReference::InlineData {
                mime_type,
                raw_bytes,
            } => {
                self.store
                    .write(&raw_bytes, inline_extension(&mime_type))
                    .await
            }
            ImageReference::RemoteUrl { url } => {
                let downloaded = self.downloader.fetch(&url).await?;
                self.store
                    .write(&downloaded.bytes, downloaded.extension)
                    .await
            }
            ImageReference::LocalPath { path } => resolve_local(path).await,
        }
    }
}

async fn resolve_local(path: PathBuf) -> Result<ResolvedImage> {
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrMcpError::NotFound(path.display().to_string()));
        }
        Err(e) => {
            return Err(OcrMcpError::Unreadable(format!("{}: {e}", path.display())));
        }
    };

    if !metadata.is_file() {
        return Err(OcrMcpError::Unreadable(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    tokio::fs::File::open(&path)
        .await
        .map_err(|e| OcrMcpError::Unreadable(format!("{}: {e}", path.display())))?;

    Ok(ResolvedImage::local(path))
}
