//! OCR (Optical Character Recognition) Module
//!
//! The recognition itself is delegated to an [`OcrEngine`], a synchronous and
//! CPU-bound collaborator. [`OcrProvider`] moves each call onto a blocking
//! worker so the protocol loop never waits on it.
//!
//! # Engines
//!
//! - `TesseractEngine` runs the `tesseract` command-line program
//! - `LeptessEngine` (feature `leptess`) calls libtesseract in-process
//!
//! # Usage
//!
//! ```rust,ignore
//! let ocr = OcrProvider::new(create_engine(&config.ocr)?);
//! let text = ocr.run(OcrRequest::new(path)).await?;
//! ```

#[cfg(feature = "leptess")]
mod libtesseract;
mod provider;
mod tesseract;

#[cfg(feature = "leptess")]
pub use libtesseract::LeptessEngine;
pub use provider::OcrProvider;
pub use tesseract::{tesseract_language, tesseract_languages, TesseractEngine};

use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;

use crate::config::{EngineKind, OcrConfig};
use crate::error::{OcrMcpError, Result};

pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Speed/accuracy tradeoff of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionLevel {
    Fast,
    #[default]
    Accurate,
}

impl RecognitionLevel {
    /// Parse a tool argument. Anything other than `fast` means accurate.
    pub fn from_arg(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("fast") {
            RecognitionLevel::Fast
        } else {
            RecognitionLevel::Accurate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionLevel::Fast => "fast",
            RecognitionLevel::Accurate => "accurate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    pub path: PathBuf,
    pub languages: Vec<String>,
    pub recognition_level: RecognitionLevel,
    pub uses_language_correction: bool,
}

impl OcrRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            languages: vec![DEFAULT_LANGUAGE.to_string()],
            recognition_level: RecognitionLevel::Accurate,
            uses_language_correction: true,
        }
    }
}

/// A blocking text recognizer.
///
/// Implementations return the detected lines in the order the engine reports
/// them. An empty vector means the engine ran and found nothing.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<String>>;
}

pub fn create_engine(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>> {
    match config.engine {
        EngineKind::Tesseract => Ok(Arc::new(TesseractEngine::new(config))),
        #[cfg(feature = "leptess")]
        EngineKind::Leptess => Ok(Arc::new(LeptessEngine::new(config))),
        #[cfg(not(feature = "leptess"))]
        EngineKind::Leptess => Err(OcrMcpError::ProcessingFailed(
            "the leptess engine requires building with the 'leptess' feature".to_string(),
        )),
    }
}
