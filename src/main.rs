use anyhow::Result;
use clap::Parser;
use mnemograph_core::{Settings, Transport};
use mnemograph_server::{run_http, run_stdio, ServerState};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mnemograph")]
#[command(version)]
#[command(about = "Agent-memory and code-intelligence JSON-RPC server")]
struct Cli {
    /// Transport: stdio (default) or http
    #[arg(long, value_parser = ["stdio", "http"])]
    transport: Option<String>,

    /// HTTP port (http transport only)
    #[arg(long)]
    port: Option<u16>,

    /// Default workspace root for the implicit stdio session
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Project id for the default workspace
    #[arg(long)]
    project_id: Option<String>,

    /// Log level: debug | info | warn | error
    #[arg(long)]
    log_level: Option<String>,

    /// Enable the file watcher under the stdio transport
    #[arg(long, default_value_t = false)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(transport) = cli.transport.as_deref() {
        settings.transport = if transport == "http" {
            Transport::Http
        } else {
            Transport::Stdio
        };
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(workspace) = cli.workspace {
        settings.workspace_root = Some(workspace);
    }
    if let Some(project_id) = cli.project_id {
        settings.project_id = Some(project_id);
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if cli.watch {
        settings.enable_watcher = true;
    }

    // stdout is reserved for protocol frames under stdio; logs always go to
    // stderr.
    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let watcher_enabled = settings.transport == Transport::Http || settings.enable_watcher;
    let state = ServerState::init(settings.clone(), watcher_enabled).await;

    match settings.transport {
        Transport::Stdio => run_stdio(state).await,
        Transport::Http => {
            tokio::select! {
                result = run_http(state, settings.port) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted; shutting down");
                    Ok(())
                }
            }
        }
    }
}
