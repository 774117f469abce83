//! Environment abstraction for deterministic testing.
//!
//! Decouples key management from system resources (wall clock, timers,
//! randomness). Production code supplies real time and an executor; tests
//! supply a manual clock and a scheduler they can drive by hand.

use std::time::Duration;

/// A one-shot task handed to [`Environment::schedule`].
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Abstract environment providing time, timers and randomness.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `schedule()` never runs the task inline on the caller's thread. A
///   rotation task takes the key engine's lock and reschedules itself.
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    ///
    /// Rotation periods are derived from this value, so it must be wall
    /// clock time agreed on (within the tolerated skew) by both peers.
    fn wall_clock_millis(&self) -> u64;

    /// Run `task` once after `delay` on a background executor.
    fn schedule(&self, delay: Duration, task: ScheduledTask);

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}
