use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::*,
    service::RequestContext,
    tool, tool_router, ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::OcrMcpError;

use super::tool::{tool_result, OcrExtractArgs, ToolDispatcher};
use super::transport;

const SERVER_NAME: &str = "ocr-mcp";

const INSTRUCTIONS: &str = "Use ocr_extract_text to read the text contained in an image. \
Pass a local path, an http(s) URL or a base64 data URL as `image`.";

/// MCP server exposing `ocr_extract_text`.
///
/// rmcp runs every request on its own task, so a slow OCR call never holds up
/// later frames. Unknown tools and bad arguments are answered as tool results
/// with `isError: true` rather than as JSON-RPC errors.
#[derive(Clone)]
pub struct OcrMcpServer {
    dispatcher: Arc<ToolDispatcher>,
    tool_router: ToolRouter<Self>,
    shutdown: CancellationToken,
}

impl OcrMcpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    /// Serve on the process stdin/stdout.
    pub async fn serve_stdio(self, shutdown: CancellationToken) -> crate::Result<()> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    /// Serve until end of input, an I/O failure, or until `shutdown` fires.
    ///
    /// On end of input the requests still running are answered before the
    /// function returns. On shutdown they are cancelled and it returns at once.
    /// A failed read or write ends the session with that error.
    pub async fn serve_io<R, W>(
        mut self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> crate::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.shutdown = shutdown.clone();
        let (transport, link) = transport::line_delimited(reader, writer, &shutdown);

        info!("MCP server listening on stdio");

        let session = match self.serve_with_ct(transport, shutdown.child_token()).await {
            Ok(service) => service
                .waiting()
                .await
                .map(|_| ())
                .map_err(|e| OcrMcpError::Service(e.to_string())),
            Err(e) => Err(OcrMcpError::Service(e.to_string())),
        };

        let end = link.finish().await?;
        match session {
            Ok(()) => {}
            Err(e) if end.input_closed || shutdown.is_cancelled() => {
                debug!(error = %e, "Session ended before initialization completed");
            }
            Err(e) => return Err(e),
        }

        info!("MCP server stopped");
        Ok(())
    }
}

#[tool_router]
impl OcrMcpServer {
    #[tool(
        name = "ocr_extract_text",
        description = "Extract text from an image using optical character recognition. The image may be a local file path, an http(s) URL, or a base64 data URL (data:image/<type>;base64,...). Returns the recognized lines in reading order."
    )]
    async fn ocr_extract_text(
        &self,
        Parameters(args): Parameters<OcrExtractArgs>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        // Dropping the extraction releases its temporary image.
        tokio::select! {
            outcome = self.dispatcher.extract(args) => Ok(tool_result(outcome)),
            _ = ctx.ct.cancelled() => {
                info!("Tool call cancelled by the client");
                Err(McpError::internal_error("tool call cancelled", None))
            }
            _ = self.shutdown.cancelled() => {
                info!("Tool call dropped for shutdown");
                Err(McpError::internal_error("server is shutting down", None))
            }
        }
    }
}

impl ServerHandler for OcrMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("OCR MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        info!(
            client_name = %request.client_info.name,
            client_version = %request.client_info.version,
            "MCP client connected"
        );
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = self
            .dispatcher
            .validate(&request.name, request.arguments.as_ref())
        {
            return Ok(tool_result(Err(e)));
        }

        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
