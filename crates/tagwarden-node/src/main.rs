//! Tagwarden node binary.
//!
//! # Usage
//!
//! ```bash
//! tagwarden-node --db keys.redb --transport tcp=60000 --transport tor=1800000
//! ```

use clap::Parser;
use tagwarden_node::{Args, Node, NodeConfig, NodeError, SystemEnv};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = NodeConfig::from(args);
    tracing::info!(
        db = %config.db_path.display(),
        transports = config.key_manager.transports.len(),
        "Tagwarden node starting"
    );

    let env = SystemEnv::current()
        .ok_or_else(|| NodeError::Runtime("not inside a Tokio runtime".to_string()))?;
    let node = tokio::task::spawn_blocking(move || Node::start(&config, env))
        .await
        .map_err(|e| NodeError::Runtime(e.to_string()))??;

    node.run_until_shutdown().await?;

    Ok(())
}
