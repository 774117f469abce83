//! Identifiers that key material is filed under.
//!
//! Key sets belong to exactly one owner: either an established contact or a
//! pending contact whose key agreement has not finished yet. [`OwnerId`]
//! makes the "exactly one" rule a property of the type rather than a runtime
//! check.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Locally assigned identifier of an established contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(pub u32);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact:{}", self.0)
    }
}

/// Identifier of a contact whose key agreement is still in progress.
///
/// Derived from the pending contact's public handshake material, so both
/// peers can compute it independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingContactId(pub [u8; 32]);

impl fmt::Display for PendingContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending:")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Identifier of a persisted key set, assigned by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeySetId(pub u32);

impl fmt::Display for KeySetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a transport (e.g. `"tcp"`, `"tor"`, `"bluetooth"`).
///
/// Transport names are mixed into key derivation, so two transports never
/// share key material even for the same contact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(String);

impl TransportId {
    /// Create a transport identifier.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyTransportId` if `name` is empty
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProtocolError::EmptyTransportId);
        }
        Ok(Self(name))
    }

    /// Transport name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transport name as UTF-8 bytes, as fed to key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner of a key set: exactly one of a contact or a pending contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerId {
    /// Established contact
    Contact(ContactId),
    /// Contact still completing key agreement
    PendingContact(PendingContactId),
}

impl OwnerId {
    /// Contact identifier, if this owner is an established contact.
    pub fn contact(&self) -> Option<ContactId> {
        match self {
            Self::Contact(c) => Some(*c),
            Self::PendingContact(_) => None,
        }
    }

    /// Pending contact identifier, if this owner is a pending contact.
    pub fn pending_contact(&self) -> Option<PendingContactId> {
        match self {
            Self::Contact(_) => None,
            Self::PendingContact(p) => Some(*p),
        }
    }
}

impl From<ContactId> for OwnerId {
    fn from(c: ContactId) -> Self {
        Self::Contact(c)
    }
}

impl From<PendingContactId> for OwnerId {
    fn from(p: PendingContactId) -> Self {
        Self::PendingContact(p)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contact(c) => c.fmt(f),
            Self::PendingContact(p) => p.fmt(f),
        }
    }
}
