//! `rumor-broadcast`: a gossip broadcast node speaking line-delimited JSON
//! on stdin/stdout. Logs go to stderr; stdout carries only protocol.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, Level};

use rumor::{Node, NodeConfig, StdioTransport};

/// Log level variable (`error`, `warn`, `info`, `debug`, `trace`).
const ENV_LOG: &str = "RUMOR_LOG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = match std::env::var(ENV_LOG) {
        Ok(raw) => raw
            .parse::<Level>()
            .with_context(|| format!("invalid {}: {:?}", ENV_LOG, raw))?,
        Err(_) => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = NodeConfig::from_env().context("invalid configuration")?;
    let (transport, members) = StdioTransport::from_stdio()
        .await
        .context("init handshake failed")?;
    info!(members = members.len(), ?config, "starting");

    let node = Arc::new(Node::new(Arc::new(transport), config));
    node.run().await?;
    Ok(())
}
