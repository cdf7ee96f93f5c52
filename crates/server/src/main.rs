use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;
mod sse;

use config::{ConfigOverrides, ServerConfig, TransportMode};

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "MCP gateway serving tools over HTTP and SSE", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conduit.toml")]
    config: PathBuf,

    /// Host to bind to [default: 0.0.0.0]
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on [default: 3000 for http, 3001 for sse]
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Transport front end
    #[arg(short, long, env = "MCP_TRANSPORT", value_enum)]
    transport: Option<TransportMode>,

    /// Seconds between SSE keep-alive events [default: 30]
    #[arg(long, env = "MCP_HEARTBEAT_SECS")]
    heartbeat_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, env = "CONDUIT_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "conduit=info,conduit_mcp=info,tower_http=debug".into());

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting Conduit MCP gateway");

    let config = ServerConfig::load(
        &args.config,
        ConfigOverrides {
            host: args.host,
            port: args.port,
            transport: args.transport,
            heartbeat_secs: args.heartbeat_secs,
        },
    )?;

    api::serve(config).await?;

    Ok(())
}
