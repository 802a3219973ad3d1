//! osmgate entry point.
//!
//! Reads one JSON tool call per stdin line and writes one JSON response per
//! stdout line. Logs go to stderr.

use osmgate_core::{FailureCode, OsmConfig, OsmError, ResolutionFailure};
use osmgate_geocode::tools::ListToolsResponse;
use osmgate_geocode::{CallToolRequest, CallToolResponse, OsmContext};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Request name that lists the available tools instead of calling one.
const LIST_TOOLS: &str = "tools/list";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Osm(#[from] OsmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to init subscriber: {0}")]
    Telemetry(String),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    if std::env::args().skip(1).any(|arg| arg == "--version" || arg == "-V") {
        println!("osmgate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing()?;

    let config = OsmConfig::from_env();
    let ctx = OsmContext::from_config(config)?;

    tokio::select! {
        result = serve(&ctx) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    ctx.shutdown().await;
    Ok(())
}

fn init_tracing() -> Result<(), CliError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("osmgate=info"));
    let json = std::env::var("OSMGATE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| CliError::Telemetry(e.to_string()))
}

/// Answer stdin lines until EOF.
async fn serve(ctx: &OsmContext) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "osmgate ready");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = handle_line(ctx, &line).await;
        reply.push('\n');
        stdout.write_all(reply.as_bytes()).await?;
        stdout.flush().await?;
    }
    tracing::info!("stdin closed");
    Ok(())
}

/// Answer one request line with one JSON document.
async fn handle_line(ctx: &OsmContext, line: &str) -> String {
    let request: CallToolRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "malformed request line");
            let failure = ResolutionFailure::new(
                FailureCode::InvalidInput,
                format!("Malformed request: {err}"),
                line,
                true,
            )
            .with_suggestion("Send one JSON object per line: {\"name\": ..., \"arguments\": {...}}");
            return encode(&CallToolResponse::failure(&failure));
        }
    };

    if request.name == LIST_TOOLS {
        return encode(&ListToolsResponse {
            tools: ctx.list_tools(),
        });
    }
    encode(&ctx.call_tool(request).await)
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode response");
        r#"{"content":[],"is_error":true}"#.to_string()
    })
}
