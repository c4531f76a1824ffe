//! Identity Types
//!
//! Participant and vehicle identities. Ordered types so BTreeMap
//! iteration is stable across participants.

use std::fmt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Stable participant identity, unique per connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Deterministic identity for the `slot`-th connection to a session.
    pub fn derive(session_name: &str, slot: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"race-sync-participant:");
        hasher.update(session_name.as_bytes());
        hasher.update(slot.to_le_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Self(id)
    }

    /// Short hex form used in logs and fallback names.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.short())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A participant as seen through the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity
    pub id: ParticipantId,
    /// Display name, once resolved
    pub name: Option<String>,
    /// Is this the session host (the authority)?
    pub is_host: bool,
}

impl Participant {
    /// Resolved name or a generated fallback.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| fallback_name(&self.id))
    }
}

/// Fallback display name for a participant without a resolved name.
pub fn fallback_name(id: &ParticipantId) -> String {
    format!("Player {}", id.short())
}

// =============================================================================
// VEHICLE ID
// =============================================================================

/// Networked vehicle entity identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle#{}", self.0)
    }
}
