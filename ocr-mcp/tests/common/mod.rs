// Shared helpers for integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use base64::{engine::general_purpose::STANDARD, Engine};
use ocr_mcp::config::{DownloadConfig, TempConfig};
use ocr_mcp::image::ImageResolver;
use ocr_mcp::mcp::{ToolDispatcher, TOOL_NAME};
use ocr_mcp::ocr::{OcrEngine, OcrProvider, OcrRequest};
use ocr_mcp::{OcrMcpError, Result};
use serde_json::{Map, Value};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// A valid 1x1 PNG.
pub const PNG_1X1_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub fn png_bytes() -> Vec<u8> {
    STANDARD.decode(PNG_1X1_BASE64).unwrap()
}

pub fn png_data_url() -> String {
    format!("data:image/png;base64,{PNG_1X1_BASE64}")
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: OcrRequest,
    pub file_existed: bool,
}

/// Engine double that records each request and answers from a script.
pub struct ScriptedEngine {
    outcome: std::result::Result<Vec<String>, String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedEngine {
    pub fn returning(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(lines.iter().map(|l| l.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(cause: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(cause.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push(RecordedCall {
            request: request.clone(),
            file_existed: request.path.is_file(),
        });
        match &self.outcome {
            Ok(lines) => Ok(lines.clone()),
            Err(cause) => Err(OcrMcpError::ProcessingFailed(cause.clone())),
        }
    }
}

pub fn dispatcher_with(
    engine: Arc<ScriptedEngine>,
    temp_root: &Path,
    download: DownloadConfig,
) -> ToolDispatcher {
    let resolver = ImageResolver::new(
        &download,
        &TempConfig {
            root: temp_root.to_path_buf(),
        },
    )
    .unwrap();
    ToolDispatcher::new(resolver, OcrProvider::new(engine))
}

pub fn dispatcher(engine: Arc<ScriptedEngine>, temp_root: &Path) -> ToolDispatcher {
    dispatcher_with(engine, temp_root, DownloadConfig::default())
}

/// Files currently present under the temp root.
pub fn temp_files(root: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// The `arguments` object of a `tools/call` request.
pub fn arguments(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("tool arguments must be an object, got {other}"),
    }
}

/// Run `ocr_extract_text` with the given arguments.
pub async fn extract(dispatcher: &ToolDispatcher, args: Value) -> Result<String> {
    dispatcher.run(TOOL_NAME, Some(&arguments(args))).await
}
