//! Key manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagwarden_proto::{MAX_CLOCK_DIFFERENCE_MS, TransportId};

/// Per-transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport identifier
    pub id: TransportId,
    /// Maximum time a stream may spend in transit on this transport
    pub max_latency: Duration,
}

impl TransportConfig {
    /// Settings for one transport.
    pub fn new(id: TransportId, max_latency: Duration) -> Self {
        Self { id, max_latency }
    }

    /// Length of a rotation period in milliseconds.
    ///
    /// `max_latency + MAX_CLOCK_DIFFERENCE`, so a stream sent at the end of
    /// one period by a peer with a skewed clock still arrives within the
    /// receiver's previous or next period.
    pub fn rotation_period_millis(&self) -> u64 {
        let latency = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        latency.saturating_add(MAX_CLOCK_DIFFERENCE_MS)
    }
}

/// Key manager settings: the set of transports to manage keys for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Registered transports
    pub transports: Vec<TransportConfig>,
}

impl KeyManagerConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport.
    ///
    /// A transport registered twice keeps the later latency.
    #[must_use]
    pub fn with_transport(mut self, id: TransportId, max_latency: Duration) -> Self {
        self.transports.retain(|t| t.id != id);
        self.transports.push(TransportConfig::new(id, max_latency));
        self
    }
}
