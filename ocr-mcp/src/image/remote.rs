use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{OcrMcpError, Result};

use super::inline::extension_for_mime;

const DEFAULT_EXTENSION: &str = "jpg";
const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// Image body fetched from a remote URL, fully buffered and size-checked.
#[derive(Debug)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

#[derive(Clone, Debug)]
pub struct ImageDownloader {
    client: Client,
    timeout_secs: u64,
    max_bytes: u64,
}

impl ImageDownloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(1)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| OcrMcpError::DownloadFailure(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
            max_bytes: config.max_bytes,
        })
    }

    pub async fn fetch(&self, url: &Url) -> Result<DownloadedImage> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(OcrMcpError::UnsupportedScheme(other.to_string())),
        }

        debug!(url = %url, "Downloading image");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrMcpError::DownloadFailure(format!(
                "server returned HTTP {status} for {url}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type);

        if let Some(ct) = content_type.as_deref() {
            if !ct.starts_with("image/") && !GENERIC_CONTENT_TYPES.contains(&ct) {
                return Err(OcrMcpError::DownloadFailure(format!(
                    "expected an image but the server sent content type '{ct}'"
                )));
            }
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(OcrMcpError::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(OcrMcpError::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(OcrMcpError::DownloadFailure(format!(
                "server returned an empty body for {url}"
            )));
        }

        let declared_image = content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        // A generic or missing content type is only trusted once the bytes
        // look like an image, whatever the URL path says.
        if !declared_image && !infer::is_image(&bytes) {
            return Err(OcrMcpError::DownloadFailure(
                "response body is not a recognizable image".to_string(),
            ));
        }

        let extension = content_type
            .as_deref()
            .and_then(|ct| ct.strip_prefix("image/"))
            .and_then(extension_for_mime)
            .or_else(|| sniffed_extension(&bytes))
            .or_else(|| url_image_extension(url))
            .unwrap_or(DEFAULT_EXTENSION);

        debug!(url = %url, bytes = bytes.len(), extension, "Downloaded image");
        Ok(DownloadedImage { bytes, extension })
    }

    fn transport_error(&self, error: reqwest::Error) -> OcrMcpError {
        if error.is_timeout() {
            warn!(timeout_secs = self.timeout_secs, "Image download timed out");
            OcrMcpError::DownloadTimeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            OcrMcpError::DownloadFailure(error.to_string())
        }
    }
}

/// `image/PNG; charset=binary` -> `image/png`
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn url_image_extension(url: &Url) -> Option<&'static str> {
    let ext = Path::new(url.path()).extension()?.to_str()?.to_lowercase();
    let mime = mime_guess::from_ext(&ext).first()?;
    if mime.type_().as_str() != "image" {
        return None;
    }
    extension_for_mime(&ext).or_else(|| extension_for_mime(mime.subtype().as_str()))
}

fn sniffed_extension(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return None;
    }
    extension_for_mime(kind.extension())
        .or_else(|| kind.mime_type().strip_prefix("image/").and_then(extension_for_mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_normalization() {
        assert_eq!(media_type("image/PNG; charset=binary"), "image/png");
        assert_eq!(media_type(" text/html "), "text/html");
    }

    #[test]
    fn test_url_extension_inference() {
        let url = Url::parse("https://example.com/scans/page.JPEG?x=1").unwrap();
        assert_eq!(url_image_extension(&url), Some("jpg"));

        let url = Url::parse("https://example.com/scan.tif").unwrap();
        assert_eq!(url_image_extension(&url), Some("tiff"));

        let url = Url::parse("https://example.com/index.html").unwrap();
        assert_eq!(url_image_extension(&url), None);

        let url = Url::parse("https://example.com/download").unwrap();
        assert_eq!(url_image_extension(&url), None);
    }

    #[test]
    fn test_sniffed_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(sniffed_extension(png), Some("png"));
        assert_eq!(sniffed_extension(b"<html></html>"), None);
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let downloader = ImageDownloader::new(&DownloadConfig::default()).unwrap();
        let url = Url::parse("ftp://example.com/image.png").unwrap();

        let result = downloader.fetch(&url).await;
        assert!(matches!(result, Err(OcrMcpError::UnsupportedScheme(s)) if s == "ftp"));
    }
}
