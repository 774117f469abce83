//! Node runtime: durable storage plus a running key manager.

use tagwarden_core::KeyManager;
use tagwarden_crypto::HkdfTransportCrypto;

use crate::{NodeConfig, NodeError, storage::RedbStorage, system_env::SystemEnv};

/// Key manager as wired up by the node.
pub type NodeKeyManager = KeyManager<RedbStorage, HkdfTransportCrypto, SystemEnv>;

/// A started node.
///
/// Owns the key manager; rotation timers stop firing once the node is
/// dropped.
pub struct Node {
    storage: RedbStorage,
    manager: NodeKeyManager,
}

impl Node {
    /// Open the key database and start key management for every configured
    /// transport.
    ///
    /// Blocks on database I/O; call from a blocking context.
    ///
    /// # Errors
    ///
    /// - `NodeError::Config` if no transports are configured
    /// - `NodeError::Storage` if the database cannot be opened
    /// - `NodeError::KeyManager` if persisted keys cannot be loaded
    pub fn start(config: &NodeConfig, env: SystemEnv) -> Result<Self, NodeError> {
        if config.key_manager.transports.is_empty() {
            return Err(NodeError::Config("no transports configured".to_string()));
        }

        let storage = RedbStorage::open(&config.db_path)?;
        let manager = KeyManager::new(
            storage.clone(),
            HkdfTransportCrypto::new(),
            env,
            config.key_manager.clone(),
        );
        manager.start_service()?;

        for transport in &config.key_manager.transports {
            if let Some(engine) = manager.engine(&transport.id) {
                tracing::info!(
                    transport = %transport.id,
                    max_latency_ms = transport.max_latency.as_millis(),
                    key_sets = engine.key_set_count(),
                    tags = engine.tag_count(),
                    "Transport ready"
                );
            }
        }

        Ok(Self { storage, manager })
    }

    /// The running key manager.
    pub fn manager(&self) -> &NodeKeyManager {
        &self.manager
    }

    /// The key database.
    pub fn storage(&self) -> &RedbStorage {
        &self.storage
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// - `NodeError::Io` if the signal handler cannot be installed
    pub async fn run_until_shutdown(self) -> Result<(), NodeError> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown signal received");
        Ok(())
    }
}
