//! MCP stdio surface
//!
//! [`OcrMcpServer`] is an rmcp server handler exposing the single
//! `ocr_extract_text` tool through [`ToolDispatcher`]. Tool failures come back
//! as results with `isError: true`. Frames are newline-delimited JSON; the
//! line transport answers malformed frames and unknown methods with JSON-RPC
//! errors without ending the session.

mod server;
mod tool;
mod transport;

pub use server::OcrMcpServer;
pub use tool::{tool_result, OcrExtractArgs, ToolDispatcher, TOOL_NAME};
