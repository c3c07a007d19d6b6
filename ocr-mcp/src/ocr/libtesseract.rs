use leptess::{LepTess, Variable};
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{OcrMcpError, Result};

use super::{tesseract_languages, OcrEngine, OcrRequest, RecognitionLevel};

/// In-process libtesseract through `leptess`.
///
/// A fresh `LepTess` is created per request because the language set is part
/// of its initialisation. libtesseract only reads the dictionary switches at
/// init time and `leptess` offers no way to pass them, so a request without
/// language correction is refused rather than silently corrected.
#[derive(Debug, Clone)]
pub struct LeptessEngine {
    tessdata_dir: Option<String>,
}

impl LeptessEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            tessdata_dir: config
                .tessdata_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

/// Runtime variables for a request, or an error for options this engine cannot honour.
fn runtime_variables(request: &OcrRequest) -> Result<Vec<(Variable, &'static str)>> {
    if !request.uses_language_correction {
        return Err(OcrMcpError::ProcessingFailed(
            "the leptess engine cannot disable language correction, use OCR_ENGINE=tesseract"
                .to_string(),
        ));
    }

    Ok(match request.recognition_level {
        RecognitionLevel::Fast => vec![(Variable::TesseditDoInvert, "0")],
        RecognitionLevel::Accurate => Vec::new(),
    })
}

impl OcrEngine for LeptessEngine {
    fn name(&self) -> &'static str {
        "leptess"
    }

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<String>> {
        let variables = runtime_variables(request)?;
        let languages = tesseract_languages(&request.languages);
        debug!(languages = %languages, "Initializing libtesseract");

        let mut lt = LepTess::new(self.tessdata_dir.as_deref(), &languages)
            .map_err(|e| OcrMcpError::ProcessingFailed(format!("Failed to init Tesseract: {e}")))?;

        for (variable, value) in variables {
            lt.set_variable(variable, value).map_err(|e| {
                OcrMcpError::ProcessingFailed(format!("Failed to set Tesseract option: {e}"))
            })?;
        }

        let bytes = std::fs::read(&request.path)
            .map_err(|e| OcrMcpError::ProcessingFailed(format!("Failed to read image: {e}")))?;

        lt.set_image_from_mem(&bytes)
            .map_err(|e| OcrMcpError::ProcessingFailed(format!("Failed to set image: {e}")))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| OcrMcpError::ProcessingFailed(format!("Failed to extract text: {e}")))?;

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}
