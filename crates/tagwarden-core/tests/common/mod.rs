//! Shared fixtures for key engine and key manager tests.

#![allow(dead_code, reason = "Each test binary uses a different subset")]
#![allow(clippy::disallowed_types, reason = "Test clock state behind a simple lock")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tagwarden_core::{Environment, ScheduledTask, TransportConfig};
use tagwarden_crypto::SecretKey;
use tagwarden_proto::{ContactId, OwnerId, TransportId};

/// Maximum latency of the test transport.
pub const MAX_LATENCY: Duration = Duration::from_secs(60);

/// Deterministic environment: the clock only moves when the test says so,
/// and scheduled tasks run only from [`ManualEnv::advance`].
#[derive(Clone)]
pub struct ManualEnv {
    inner: Arc<Mutex<ManualEnvInner>>,
}

struct ManualEnvInner {
    now_ms: u64,
    next_seq: u64,
    tasks: Vec<Pending>,
    random_counter: u8,
}

struct Pending {
    due_ms: u64,
    seq: u64,
    task: ScheduledTask,
}

impl ManualEnv {
    pub fn new(now_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualEnvInner {
                now_ms,
                next_seq: 0,
                tasks: Vec::new(),
                random_counter: 0,
            })),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.lock().unwrap().now_ms
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    /// Due time of the earliest pending task.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.inner.lock().unwrap().tasks.iter().map(|p| p.due_ms).min()
    }

    /// Move the clock forward, running every task that falls due, in due
    /// order, with the clock set to each task's due time.
    pub fn advance(&self, by: Duration) {
        let target = self.now_ms() + by.as_millis() as u64;
        loop {
            let task = {
                let mut inner = self.inner.lock().unwrap();
                let next = inner
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due_ms <= target)
                    .min_by_key(|(_, p)| (p.due_ms, p.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let pending = inner.tasks.remove(i);
                        inner.now_ms = inner.now_ms.max(pending.due_ms);
                        pending.task
                    },
                    None => {
                        inner.now_ms = target;
                        return;
                    },
                }
            };
            // Run outside the lock: the task may schedule again
            task();
        }
    }

    /// Move the clock without running anything.
    pub fn set_now_ms(&self, now_ms: u64) {
        self.inner.lock().unwrap().now_ms = now_ms;
    }
}

impl Environment for ManualEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.now_ms()
    }

    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        let mut inner = self.inner.lock().unwrap();
        let due_ms = inner.now_ms + delay.as_millis() as u64;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.push(Pending { due_ms, seq, task });
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut inner = self.inner.lock().unwrap();
        for byte in buffer {
            inner.random_counter = inner.random_counter.wrapping_add(1);
            *byte = inner.random_counter;
        }
    }
}

pub fn tcp() -> TransportId {
    TransportId::new("tcp").unwrap()
}

pub fn tcp_config() -> TransportConfig {
    TransportConfig::new(tcp(), MAX_LATENCY)
}

pub fn period_length_ms() -> u64 {
    tcp_config().rotation_period_millis()
}

/// A wall clock time `offset_ms` into rotation period `period`.
pub fn time_in_period(period: u64, offset_ms: u64) -> u64 {
    period * period_length_ms() + offset_ms
}

pub fn contact(id: u32) -> OwnerId {
    OwnerId::Contact(ContactId(id))
}

pub fn root_key(seed: u8) -> SecretKey {
    SecretKey::from_bytes([seed; 32])
}
