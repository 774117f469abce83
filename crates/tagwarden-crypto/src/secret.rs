//! Symmetric key material with zeroization.

use serde::{Deserialize, Serialize};
use tagwarden_proto::SECRET_KEY_LENGTH;
use zeroize::Zeroize;

/// A 32-byte symmetric key.
///
/// Zeroized on drop. `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey([u8; SECRET_KEY_LENGTH]);

impl SecretKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = SecretKey::from_bytes([0x42; 32]);
        let debug = format!("{key:?}");
        assert_eq!(debug, "SecretKey([REDACTED])");
        assert!(!debug.contains("42"));
    }
}
