use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{OcrMcpError, Result};

use super::{OcrEngine, OcrRequest};

/// Runs a blocking [`OcrEngine`] off the async executor.
#[derive(Clone)]
pub struct OcrProvider {
    engine: Arc<dyn OcrEngine>,
}

impl OcrProvider {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Recognize text and join the detected lines with `\n`.
    ///
    /// The engine runs on the blocking pool and hands its outcome back over a
    /// oneshot channel, so exactly one result arrives per call. A worker that
    /// dies without reporting is surfaced as a processing failure.
    pub async fn run(&self, request: OcrRequest) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);

        debug!(
            engine = engine.name(),
            path = %request.path.display(),
            languages = ?request.languages,
            level = request.recognition_level.as_str(),
            correction = request.uses_language_correction,
            "Starting OCR"
        );

        tokio::task::spawn_blocking(move || {
            let outcome = engine.recognize(&request);
            if tx.send(outcome).is_err() {
                warn!("OCR finished after the caller went away");
            }
        });

        let lines = rx.await.map_err(|_| {
            OcrMcpError::ProcessingFailed("OCR worker stopped without a result".to_string())
        })??;

        if lines.is_empty() {
            return Err(OcrMcpError::NoTextFound);
        }

        debug!(lines = lines.len(), "OCR finished");
        Ok(lines.join("\n"))
    }
}

impl std::fmt::Debug for OcrProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrProvider")
            .field("engine", &self.engine.name())
            .finish()
    }
}
