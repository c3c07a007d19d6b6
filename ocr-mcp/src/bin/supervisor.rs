use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ocr_mcp::config::Config;
use ocr_mcp::supervisor::Supervisor;
use ocr_mcp::{logging, shutdown};

#[derive(Parser)]
#[command(name = "ocr-mcp-supervisor")]
#[command(about = "Run the ocr-mcp server and restart it when it crashes")]
#[command(version)]
struct Args {
    /// Server executable (default: OCR_SERVER_BINARY, then ocr-mcp next to this binary)
    #[arg(long)]
    server: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    /// Arguments passed through to the server
    #[arg(last = true)]
    server_args: Vec<String>,
}

fn default_server_binary() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the supervisor executable")?;
    Ok(exe.with_file_name(format!("ocr-mcp{}", std::env::consts::EXE_SUFFIX)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    logging::init(args.debug);

    let config = Config::from_env();
    let binary = match args.server.or_else(|| config.supervisor.server_binary.clone()) {
        Some(path) => path,
        None => default_server_binary()?,
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown::shutdown_signal(cancel_token.clone()));

    let mut supervisor = Supervisor::new(binary, args.server_args, config.supervisor);
    let token = cancel_token.clone();
    let code = match tokio::spawn(async move { supervisor.run(token).await }).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Supervisor failed: {}", e);
            cancel_token.cancel();
            1
        }
    };

    std::process::exit(code);
}
