//! Fuzz target for ReorderingWindow
//!
//! Drives a window with arbitrary sequence numbers, some relative to the
//! current base and some absolute.
//!
//! # Invariants
//!
//! - `advance` never panics
//! - A number is accepted at most once
//! - The base never moves backwards and always sits on an unseen number
//! - The persisted form rebuilds an identical window

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tagwarden_core::ReorderingWindow;

#[derive(Debug, Arbitrary)]
enum Step {
    /// Offset from the current base
    Relative(u8),
    /// Raw sequence number
    Absolute(u64),
}

#[derive(Debug, Arbitrary)]
struct Input {
    /// Starting base, clamped into the valid range
    start: u32,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let Ok(mut window) = ReorderingWindow::from_bitmap(u64::from(input.start), &[0; 4]) else {
        return;
    };
    let mut accepted = HashSet::new();

    for step in input.steps {
        let number = match step {
            Step::Relative(offset) => window.base().saturating_add(u64::from(offset)),
            Step::Absolute(number) => number,
        };
        let before = window.base();

        if window.advance(number).is_ok() {
            assert!(accepted.insert(number), "accepted {number} twice");
        }

        assert!(window.base() >= before);
        assert!(!window.is_seen(window.base()));

        let restored = ReorderingWindow::from_bitmap(window.base(), &window.bitmap())
            .expect("persisted window must reload");
        assert_eq!(restored, window);
    }
});
