//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait using
//! the real wall clock, Tokio timers and the OS cryptographic RNG.
//!
//! # Capabilities
//!
//! - Real wall clock (`std::time::SystemTime`), as rotation periods require
//! - Tokio timers for scheduled key rotation, with the rotation itself run
//!   on the blocking pool since it takes the engine lock and writes storage
//! - OS cryptographic RNG (getrandom). Truly random, not reproducible

use std::time::Duration;

use tagwarden_core::{Environment, ScheduledTask};
use tokio::runtime::Handle;

/// Production environment bound to a Tokio runtime.
///
/// # Panics
///
/// Panics if the OS RNG fails or the system clock reads before the Unix
/// epoch. Neither can be worked around: keys derived from a bad clock or bad
/// randomness are worse than no keys.
#[derive(Clone)]
pub struct SystemEnv {
    runtime: Handle,
}

impl SystemEnv {
    /// Create an environment that schedules tasks on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Create an environment bound to the runtime of the calling thread.
    ///
    /// Returns `None` outside a Tokio runtime.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_millis(&self) -> u64 {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)");
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }

    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = runtime.spawn_blocking(task).await {
                tracing::error!(error = %e, "Scheduled task panicked");
            }
        });
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - node cannot derive keys");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn system_env_clock_is_after_2020() {
        let env = SystemEnv::current().unwrap();

        assert!(env.wall_clock_millis() > 1_577_836_800_000);
    }

    #[test]
    fn system_env_unavailable_outside_runtime() {
        assert!(SystemEnv::current().is_none());
    }

    #[tokio::test]
    async fn system_env_random_bytes_are_random() {
        let env = SystemEnv::current().unwrap();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        // Extremely unlikely to be equal if random
        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[tokio::test(start_paused = true)]
    async fn system_env_runs_task_after_delay() {
        let env = SystemEnv::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let flag = Arc::clone(&ran);
        env.schedule(
            Duration::from_secs(3600),
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                let _ = done_tx.send(());
            }),
        );

        // Scheduling never runs the task inline
        assert!(!ran.load(Ordering::SeqCst));

        done_rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
