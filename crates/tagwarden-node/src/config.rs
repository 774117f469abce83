//! Node configuration and command-line arguments.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tagwarden_core::KeyManagerConfig;
use tagwarden_proto::TransportId;

/// Tagwarden transport key management node
#[derive(Parser, Debug)]
#[command(name = "tagwarden-node")]
#[command(about = "Tagwarden transport key management node")]
#[command(version)]
pub struct Args {
    /// Path to the key database
    #[arg(long, default_value = "tagwarden.redb")]
    pub db: PathBuf,

    /// Transport to manage keys for, as `name=max_latency_ms` (repeatable)
    #[arg(long = "transport", value_name = "NAME=MS", value_parser = parse_transport, required = true)]
    pub transports: Vec<TransportArg>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// A parsed `--transport` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportArg {
    /// Transport name
    pub id: TransportId,
    /// Maximum latency of the transport
    pub max_latency: Duration,
}

/// Parse `name=max_latency_ms`.
pub fn parse_transport(arg: &str) -> Result<TransportArg, String> {
    let (name, latency) =
        arg.split_once('=').ok_or_else(|| format!("expected NAME=MS, got `{arg}`"))?;
    let id = TransportId::new(name.trim()).map_err(|e| e.to_string())?;
    let millis: u64 =
        latency.trim().parse().map_err(|e| format!("invalid latency `{latency}`: {e}"))?;

    Ok(TransportArg { id, max_latency: Duration::from_millis(millis) })
}

/// Runtime configuration of the node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Path to the key database
    pub db_path: PathBuf,
    /// Transports to manage keys for
    pub key_manager: KeyManagerConfig,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl NodeConfig {
    /// Configuration with no transports.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            key_manager: KeyManagerConfig::new(),
            log_level: "info".to_string(),
        }
    }

    /// Add a transport.
    #[must_use]
    pub fn with_transport(mut self, id: TransportId, max_latency: Duration) -> Self {
        self.key_manager = self.key_manager.with_transport(id, max_latency);
        self
    }
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        let key_manager = args
            .transports
            .into_iter()
            .fold(KeyManagerConfig::new(), |config, t| config.with_transport(t.id, t.max_latency));

        Self { db_path: args.db, key_manager, log_level: args.log_level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_argument() {
        let parsed = parse_transport("tor=1800000").unwrap();

        assert_eq!(parsed.id.as_str(), "tor");
        assert_eq!(parsed.max_latency, Duration::from_secs(1800));
    }

    #[test]
    fn rejects_malformed_transport_argument() {
        assert!(parse_transport("tcp").is_err());
        assert!(parse_transport("=100").is_err());
        assert!(parse_transport("tcp=soon").is_err());
    }

    #[test]
    fn args_build_config() {
        let args = Args::try_parse_from([
            "tagwarden-node",
            "--db",
            "/tmp/keys.redb",
            "--transport",
            "tcp=60000",
            "--transport",
            "bluetooth=30000",
            "--transport",
            "tcp=90000",
        ])
        .unwrap();

        let config = NodeConfig::from(args);

        assert_eq!(config.db_path, PathBuf::from("/tmp/keys.redb"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.key_manager.transports.len(), 2);
        let tcp = config.key_manager.transports.iter().find(|t| t.id.as_str() == "tcp").unwrap();
        assert_eq!(tcp.max_latency, Duration::from_secs(90));
    }

    #[test]
    fn transport_is_required() {
        assert!(Args::try_parse_from(["tagwarden-node"]).is_err());
    }
}
