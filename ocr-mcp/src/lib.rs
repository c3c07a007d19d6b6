//! Image OCR exposed as a single MCP tool over stdio, plus a restart
//! supervisor for the server process.

pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod mcp;
pub mod ocr;
pub mod shutdown;
pub mod supervisor;

pub use config::Config;
pub use error::{OcrMcpError, Result};
