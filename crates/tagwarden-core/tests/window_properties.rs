//! Property-based tests for the reordering window
//!
//! 1. **No replay**: a number is accepted at most once
//! 2. **Monotonic base**: the window only ever slides forward, and always
//!    lands on an unseen number
//! 3. **Change accounting**: `unseen()` after an advance equals `unseen()`
//!    before, minus `removed`, plus `added`
//! 4. **Persistence**: the bitmap form rebuilds an identical window

use std::collections::BTreeSet;

use proptest::prelude::*;
use tagwarden_core::{ReorderingWindow, WindowError};
use tagwarden_proto::REORDERING_WINDOW_SIZE;

/// Offsets relative to the current base, a few of which land past the top
fn offsets() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..(REORDERING_WINDOW_SIZE as u64 + 4), 1..200)
}

#[test]
fn prop_accepted_numbers_never_accepted_again() {
    proptest!(|(offsets in offsets())| {
        let mut window = ReorderingWindow::new();
        let mut accepted = BTreeSet::new();

        for offset in offsets {
            let number = window.base() + offset;
            match window.advance(number) {
                Ok(_) => prop_assert!(accepted.insert(number), "{number} accepted twice"),
                Err(WindowError::AlreadySeen { .. }) => prop_assert!(accepted.contains(&number)),
                Err(WindowError::OutOfRange { .. }) => {
                    prop_assert!(offset >= REORDERING_WINDOW_SIZE as u64);
                },
                Err(e) => prop_assert!(false, "unexpected error {e}"),
            }
        }

        for number in accepted {
            prop_assert!(window.advance(number).is_err());
        }
    });
}

#[test]
fn prop_base_moves_forward_onto_unseen_number() {
    proptest!(|(offsets in offsets())| {
        let mut window = ReorderingWindow::new();

        for offset in offsets {
            let before = window.base();
            let _ = window.advance(before + offset);

            prop_assert!(window.base() >= before);
            prop_assert!(!window.is_seen(window.base()));
        }
    });
}

#[test]
fn prop_change_accounts_for_unseen_numbers() {
    proptest!(|(offsets in offsets())| {
        let mut window = ReorderingWindow::new();

        for offset in offsets {
            let before: BTreeSet<u64> = window.unseen().into_iter().collect();
            let Ok(change) = window.advance(window.base() + offset) else {
                prop_assert_eq!(window.unseen().into_iter().collect::<BTreeSet<_>>(), before);
                continue;
            };

            let mut expected = before;
            for removed in &change.removed {
                prop_assert!(expected.remove(removed), "{removed} was not unseen");
            }
            expected.extend(change.added.iter().copied());

            prop_assert_eq!(window.unseen().into_iter().collect::<BTreeSet<_>>(), expected);
        }
    });
}

#[test]
fn prop_bitmap_rebuilds_identical_window() {
    proptest!(|(offsets in offsets())| {
        let mut window = ReorderingWindow::new();
        for offset in offsets {
            let _ = window.advance(window.base() + offset);

            let restored = ReorderingWindow::from_bitmap(window.base(), &window.bitmap()).unwrap();
            prop_assert_eq!(&restored, &window);
        }
    });
}
