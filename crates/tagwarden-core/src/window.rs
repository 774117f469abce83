//! Sliding anti-replay window over stream numbers.
//!
//! The window covers `[base, base + W)`. Bit `i` records whether stream number
//! `base + i` has been accepted. Accepting a number in the upper half slides
//! the window up so that roughly half of it stays free for numbers that have
//! not arrived yet.
//!
//! # Invariants
//!
//! - `base` never decreases and never exceeds 2^32
//! - After every [`ReorderingWindow::advance`], the number at `base` is unseen
//! - The window is exactly `W` bits wide; `W` is a power of two and a multiple
//!   of 8

use tagwarden_proto::{MAX_32_BIT_UNSIGNED, REORDERING_WINDOW_SIZE};
use thiserror::Error;

/// Errors from reordering window operations.
///
/// All of these are precondition violations by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Window width is not a non-zero, byte-aligned power of two
    #[error("invalid window size: {size} bits")]
    InvalidSize {
        /// Requested width in bits
        size: usize,
    },

    /// Base lies beyond the stream number space
    #[error("invalid window base: {base}")]
    InvalidBase {
        /// Requested base
        base: u64,
    },

    /// Stream number does not fit in the tag encoding
    #[error("stream number {sequence_number} exceeds 2^32 - 1")]
    TooLarge {
        /// Offending stream number
        sequence_number: u64,
    },

    /// Stream number lies outside the window
    #[error("stream number {sequence_number} outside window [{base}, {base} + {size})")]
    OutOfRange {
        /// Offending stream number
        sequence_number: u64,
        /// Current window base
        base: u64,
        /// Window width
        size: usize,
    },

    /// Stream number was already accepted
    #[error("stream number {sequence_number} already seen")]
    AlreadySeen {
        /// Offending stream number
        sequence_number: u64,
    },
}

/// Stream numbers entering and leaving the window after an
/// [`advance`](ReorderingWindow::advance).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowChange {
    /// Numbers that slid into the top of the window
    pub added: Vec<u64>,
    /// Numbers that are no longer acceptable: the one just accepted, and any
    /// unseen numbers that slid out of the bottom
    pub removed: Vec<u64>,
}

/// Fixed-width anti-replay window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderingWindow {
    base: u64,
    seen: Vec<bool>,
}

impl ReorderingWindow {
    /// Empty window of the protocol width, starting at zero.
    pub fn new() -> Self {
        Self { base: 0, seen: vec![false; REORDERING_WINDOW_SIZE] }
    }

    /// Empty window of `size` bits, starting at zero.
    ///
    /// # Errors
    ///
    /// - `WindowError::InvalidSize` unless `size` is a non-zero power of two
    ///   and a multiple of 8
    pub fn with_size(size: usize) -> Result<Self, WindowError> {
        check_size(size)?;
        Ok(Self { base: 0, seen: vec![false; size] })
    }

    /// Rebuild a window from its persisted form.
    ///
    /// The width is `bitmap.len() * 8`; bits are read MSB-first.
    ///
    /// # Errors
    ///
    /// - `WindowError::InvalidSize` if the bitmap length is not a valid width
    /// - `WindowError::InvalidBase` if `base > 2^32`
    pub fn from_bitmap(base: u64, bitmap: &[u8]) -> Result<Self, WindowError> {
        check_size(bitmap.len() * 8)?;
        if base > MAX_32_BIT_UNSIGNED + 1 {
            return Err(WindowError::InvalidBase { base });
        }

        let seen = bitmap
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| byte & (0x80 >> bit) != 0))
            .collect();

        Ok(Self { base, seen })
    }

    /// Lowest stream number not yet known to be seen.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Width of the window in bits.
    pub fn size(&self) -> usize {
        self.seen.len()
    }

    /// Persisted form: one bit per position, MSB-first.
    pub fn bitmap(&self) -> Vec<u8> {
        self.seen
            .chunks(8)
            .map(|bits| {
                bits.iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, &seen)| if seen { byte | (0x80 >> i) } else { byte })
            })
            .collect()
    }

    /// Whether `sequence_number` lies in the window and has been accepted.
    pub fn is_seen(&self, sequence_number: u64) -> bool {
        sequence_number
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|offset| self.seen.get(offset).copied())
            .unwrap_or(false)
    }

    /// Stream numbers in the window that have not been accepted yet.
    pub fn unseen(&self) -> Vec<u64> {
        self.seen
            .iter()
            .enumerate()
            .filter(|&(_, &seen)| !seen)
            .map(|(i, _)| self.base + i as u64)
            .collect()
    }

    /// Accept `sequence_number` and slide the window if it landed in the
    /// upper half.
    ///
    /// # Errors
    ///
    /// - `WindowError::TooLarge` if `sequence_number > 2^32 - 1`
    /// - `WindowError::OutOfRange` if it lies outside `[base, base + W)`
    /// - `WindowError::AlreadySeen` if it was accepted before
    pub fn advance(&mut self, sequence_number: u64) -> Result<WindowChange, WindowError> {
        if sequence_number > MAX_32_BIT_UNSIGNED {
            return Err(WindowError::TooLarge { sequence_number });
        }

        let size = self.size();
        let offset = sequence_number
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&offset| offset < size)
            .ok_or(WindowError::OutOfRange { sequence_number, base: self.base, size })?;

        if self.seen[offset] {
            return Err(WindowError::AlreadySeen { sequence_number });
        }
        self.seen[offset] = true;

        // Keep the window about half empty above the accepted number, then
        // make sure the new base sits on an unseen number
        let mut slide = (offset + 1).saturating_sub(size / 2);
        while slide < size && self.seen[slide] {
            slide += 1;
        }

        if slide == 0 {
            return Ok(WindowChange { added: Vec::new(), removed: vec![sequence_number] });
        }

        let mut change = WindowChange {
            added: Vec::with_capacity(slide),
            removed: Vec::with_capacity(slide + 1),
        };
        for i in 0..slide {
            if !self.seen[i] {
                change.removed.push(self.base + i as u64);
            }
            change.added.push(self.base + (size + i) as u64);
        }
        change.removed.push(sequence_number);

        self.seen.copy_within(slide.., 0);
        self.seen[size - slide..].fill(false);
        self.base += slide as u64;

        debug_assert!(!self.seen[0]);
        debug_assert!(self.base <= MAX_32_BIT_UNSIGNED + 1 + size as u64);

        Ok(change)
    }
}

impl Default for ReorderingWindow {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size(size: usize) -> Result<(), WindowError> {
    if size == 0 || !size.is_power_of_two() || size % 8 != 0 {
        return Err(WindowError::InvalidSize { size });
    }
    Ok(())
}
