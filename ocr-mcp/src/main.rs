use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ocr_mcp::config::{self, Config};
use ocr_mcp::image::ImageResolver;
use ocr_mcp::mcp::{OcrMcpServer, ToolDispatcher};
use ocr_mcp::ocr::{create_engine, OcrProvider};
use ocr_mcp::{logging, shutdown};

#[derive(Parser)]
#[command(name = "ocr-mcp")]
#[command(about = "MCP server that extracts text from images over stdio")]
#[command(version)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    logging::init(args.debug);

    let config = Config::from_env();
    if config::is_supervised() {
        tracing::info!("Running under the ocr-mcp supervisor");
    }

    let ocr = OcrProvider::new(
        create_engine(&config.ocr).context("failed to initialize OCR engine")?,
    );
    tracing::info!("OCR engine: {}", ocr.engine_name());

    let resolver = ImageResolver::new(&config.download, &config.temp)
        .context("failed to initialize image resolver")?;
    tracing::info!("Temporary images under {}", resolver.temp_root().display());

    let dispatcher = Arc::new(ToolDispatcher::new(resolver, ocr));
    let server = OcrMcpServer::new(dispatcher);

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown::shutdown_signal(cancel_token.clone()));

    server.serve_stdio(cancel_token.clone()).await?;

    if cancel_token.is_cancelled() {
        // Blocking stdin reads and OCR workers would hold up runtime shutdown.
        std::process::exit(0);
    }

    Ok(())
}
