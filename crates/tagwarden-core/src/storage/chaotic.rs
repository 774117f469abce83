//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails storage operations so tests can check that a failed write
//! leaves the key engine's in-memory state exactly as it was.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tagwarden_crypto::TransportKeys;
use tagwarden_proto::{KeySetId, OwnerId, TransportId};

use super::{Storage, StorageError};
use crate::keys::TransportKeySet;

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with the configured probability. A failed operation never reaches the
/// inner storage, so a failure is indistinguishable from a write that was
/// rolled back.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: Arc<Mutex<f64>>,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, so chaos runs are reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing each operation with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert_valid_rate(failure_rate);

        Self {
            inner,
            failure_rate: Arc::new(Mutex::new(failure_rate)),
            rng: Arc::new(Mutex::new(ChaoticRng { state: seed })),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Change the failure rate for subsequent operations.
    ///
    /// Shared by every clone, so a test can flip a running engine's storage
    /// between healthy and failing.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::expect_used)]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert_valid_rate(failure_rate);
        *self.failure_rate.lock().expect("failure_rate mutex poisoned") = failure_rate;
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    #[allow(clippy::expect_used)]
    fn fail_point(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let rate = *self.failure_rate.lock().expect("failure_rate mutex poisoned");
        if self.rng.lock().expect("ChaoticRng mutex poisoned").next() < rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

fn assert_valid_rate(failure_rate: f64) {
    assert!(
        (0.0..=1.0).contains(&failure_rate),
        "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
    );
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn contains_transport(&self, transport: &TransportId) -> Result<bool, StorageError> {
        self.fail_point()?;
        self.inner.contains_transport(transport)
    }

    fn add_transport(
        &self,
        transport: &TransportId,
        max_latency: Duration,
    ) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.add_transport(transport, max_latency)
    }

    fn get_transport_keys(
        &self,
        transport: &TransportId,
    ) -> Result<Vec<TransportKeySet>, StorageError> {
        self.fail_point()?;
        self.inner.get_transport_keys(transport)
    }

    fn add_transport_keys(
        &self,
        owner: OwnerId,
        keys: &TransportKeys,
    ) -> Result<KeySetId, StorageError> {
        self.fail_point()?;
        self.inner.add_transport_keys(owner, keys)
    }

    fn update_transport_keys(&self, sets: &[TransportKeySet]) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.update_transport_keys(sets)
    }

    fn set_transport_keys_active(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.set_transport_keys_active(transport, key_set_id)
    }

    fn set_reordering_window(
        &self,
        key_set_id: KeySetId,
        transport: &TransportId,
        period: u64,
        base: u64,
        bitmap: &[u8],
    ) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.set_reordering_window(key_set_id, transport, period, base, bitmap)
    }

    fn increment_stream_counter(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.increment_stream_counter(transport, key_set_id)
    }

    fn remove_transport_keys(
        &self,
        transport: &TransportId,
        key_set_id: KeySetId,
    ) -> Result<(), StorageError> {
        self.fail_point()?;
        self.inner.remove_transport_keys(transport, key_set_id)
    }
}
