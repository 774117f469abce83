//! Durable storage for transport keys.
//!
//! [`RedbStorage`] implements the core [`Storage`](tagwarden_core::Storage)
//! trait on an embedded ACID database. In-memory and fault-injecting
//! implementations live in `tagwarden-core`.

mod redb;

pub use self::redb::RedbStorage;
