//! Tagwarden key management node.
//!
//! Production glue around [`tagwarden_core`]: durable key storage on redb, a
//! Tokio-backed [`Environment`](tagwarden_core::Environment), and the
//! configuration the `tagwarden-node` binary is started with.
//!
//! # Components
//!
//! - [`RedbStorage`]: ACID key set storage, CBOR values
//! - [`SystemEnv`]: wall clock, Tokio timers, OS randomness
//! - [`Node`]: opens storage and starts the key manager
//! - [`NodeConfig`] / [`Args`]: configuration and its CLI form

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod node;
pub mod storage;
mod system_env;

pub use config::{Args, NodeConfig, TransportArg, parse_transport};
pub use error::NodeError;
pub use node::{Node, NodeKeyManager};
pub use storage::RedbStorage;
pub use system_env::SystemEnv;
