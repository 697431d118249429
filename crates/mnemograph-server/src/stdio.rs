//! stdio transport — JSON-RPC 2.0, one message per line
//!
//! stdout carries protocol frames only; everything else goes to stderr via
//! tracing. One implicit session for the whole process.

use crate::state::ServerState;
use mnemograph_core::{JsonRpcRequest, JsonRpcResponse, STDIO_SESSION};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

pub async fn run_stdio(state: Arc<ServerState>) -> anyhow::Result<()> {
    info!("stdio transport ready");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                debug!("unparseable frame: {}", e);
                write_response(&mut stdout, &JsonRpcResponse::parse_error(e.to_string())).await?;
                continue;
            }
        };
        let shutting_down = request.method == "shutdown";
        if let Some(response) = state.handle_request(STDIO_SESSION, request).await {
            write_response(&mut stdout, &response).await?;
        }
        if shutting_down {
            info!("shutdown requested");
            break;
        }
    }
    Ok(())
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> anyhow::Result<()> {
    let mut frame = serde_json::to_vec(response)?;
    frame.push(b'\n');
    stdout.write_all(&frame).await?;
    stdout.flush().await?;
    Ok(())
}
