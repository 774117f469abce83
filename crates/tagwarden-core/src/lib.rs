//! Tagwarden key management core.
//!
//! Sans-IO logic for transport-layer keys: deriving and rotating per-contact
//! key sets, recognising incoming streams by their tags, handing out stream
//! numbers for outgoing streams, and framing stream bytes.
//!
//! # Architecture
//!
//! ```text
//!  KeyManager ──► TransportKeyEngine (one per transport)
//!                    │        │         │
//!                    ▼        ▼         ▼
//!                 Storage  Environment  TransportCrypto
//!                 (trait)  (clock,      (tagwarden-crypto)
//!                           timers,
//!                           randomness)
//! ```
//!
//! Nothing here touches the network, the filesystem or the system clock.
//! Production glue (`tagwarden-node`) supplies a durable [`Storage`] and a
//! real [`Environment`]; tests supply [`MemoryStorage`] and a manual clock.
//!
//! # Components
//!
//! - [`ReorderingWindow`]: anti-replay bitmap over stream numbers
//! - [`TransportKeyEngine`]: key sets and tag index for one transport
//! - [`KeyManager`]: fans calls out to the engines
//! - [`StreamWriter`] / [`StreamReader`]: bytes to frames and back

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod engine;
pub mod env;
pub mod error;
pub mod keys;
pub mod manager;
pub mod storage;
pub mod stream;
pub mod window;

pub use config::{KeyManagerConfig, TransportConfig};
pub use context::StreamContext;
pub use engine::TransportKeyEngine;
pub use env::{Environment, ScheduledTask};
pub use error::{KeyError, KeyManagerError};
pub use keys::{IncomingSlot, TransportKeySet};
pub use manager::{KeyManager, KeyManagerEvent};
pub use storage::{ChaoticStorage, MemoryStorage, Storage, StorageError};
pub use stream::{StreamReader, StreamWriter, create_incoming_stream, create_outgoing_stream};
pub use window::{ReorderingWindow, WindowChange, WindowError};
