use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrMcpError {
    #[error("Invalid image format: {0}")]
    InvalidFormat(String),

    #[error("Failed to decode base64 image data: {0}")]
    DecodeFailure(String),

    #[error("Image file not found: {0}")]
    NotFound(String),

    #[error("Image file is not readable: {0}")]
    Unreadable(String),

    #[error("Failed to download image: {0}")]
    DownloadFailure(String),

    #[error("Image download timed out after {timeout_secs} seconds, the request can be retried")]
    DownloadTimeout { timeout_secs: u64 },

    #[error("Unsupported URL scheme '{0}', only http and https are allowed")]
    UnsupportedScheme(String),

    #[error("Image exceeds the maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("No text found in image")]
    NoTextFound,

    #[error("OCR processing error: {0}")]
    ProcessingFailed(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Failed to start server process: {0}")]
    Spawn(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("MCP service error: {0}")]
    Service(String),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrMcpError {
    /// JSON-RPC error code used when this error is answered as a protocol
    /// error rather than as a tool result.
    pub fn rpc_code(&self) -> i32 {
        match self {
            OcrMcpError::Json(_) => -32700,
            OcrMcpError::InvalidRequest(_) => -32600,
            OcrMcpError::MethodNotFound(_) => -32601,
            OcrMcpError::UnknownTool(_)
            | OcrMcpError::MissingParameter(_)
            | OcrMcpError::InvalidParameter { .. } => -32602,
            _ => -32603,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrMcpError::DownloadTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, OcrMcpError>;
