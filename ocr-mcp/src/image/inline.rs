use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{OcrMcpError, Result};

pub const DATA_URL_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = "base64,";

/// Decoded `data:image/<mime>;base64,<payload>` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Subtype after `image/`, e.g. `png` or `x-bmp`.
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decode an inline data URL.
///
/// The payload is everything after the first `base64,` marker and the MIME
/// subtype is everything between `data:image/` and the following `;`.
pub fn decode_data_url(raw: &str) -> Result<InlineImage> {
    let rest = raw.strip_prefix(DATA_URL_PREFIX).ok_or_else(|| {
        OcrMcpError::InvalidFormat(format!("inline image must start with '{DATA_URL_PREFIX}'"))
    })?;

    let (header, payload) = rest.split_once(BASE64_MARKER).ok_or_else(|| {
        OcrMcpError::InvalidFormat("inline image is missing the 'base64,' marker".to_string())
    })?;

    let (mime_type, _) = header.split_once(';').ok_or_else(|| {
        OcrMcpError::InvalidFormat("inline image is missing ';' after the MIME type".to_string())
    })?;

    // Data URLs pasted from other tools are often line-wrapped.
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| OcrMcpError::DecodeFailure(e.to_string()))?;

    if bytes.is_empty() {
        return Err(OcrMcpError::DecodeFailure("payload is empty".to_string()));
    }

    Ok(InlineImage {
        mime_type: mime_type.trim().to_lowercase(),
        bytes,
    })
}

/// Map an image MIME subtype to the file extension the engine expects.
pub fn extension_for_mime(subtype: &str) -> Option<&'static str> {
    match subtype.to_lowercase().as_str() {
        "jpeg" | "jpg" | "pjpeg" => Some("jpg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        "bmp" | "x-bmp" | "x-ms-bmp" => Some("bmp"),
        "tiff" | "tif" => Some("tiff"),
        _ => None,
    }
}

/// Extension for an inline payload. Unrecognised subtypes are written as PNG.
pub fn inline_extension(subtype: &str) -> &'static str {
    extension_for_mime(subtype).unwrap_or("png")
}
