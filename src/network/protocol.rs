//! Protocol Messages
//!
//! Wire format for race results replicated from the authority to observers
//! over the runtime's reliable channel. JSON for debugging ease, with
//! optional binary (bincode) for production.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::game::events::{FinishRecord, RaceEvent};

// =============================================================================
// AUTHORITY -> OBSERVER MESSAGES
// =============================================================================

/// Messages sent from the results authority to every other participant.
///
/// Externally tagged so the same enum decodes under both formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceMessage {
    /// A participant finished (provisional arrival place).
    PlayerFinished(FinishRecord),

    /// Final results, sorted by elapsed time.
    RaceFinished {
        /// Records in order of record
        results: Vec<FinishRecord>,
    },
}

impl From<RaceEvent> for RaceMessage {
    fn from(event: RaceEvent) -> Self {
        match event {
            RaceEvent::PlayerFinished(record) => RaceMessage::PlayerFinished(record),
            RaceEvent::RaceFinished(results) => RaceMessage::RaceFinished { results },
        }
    }
}

impl From<RaceMessage> for RaceEvent {
    fn from(message: RaceMessage) -> Self {
        match message {
            RaceMessage::PlayerFinished(record) => RaceEvent::PlayerFinished(record),
            RaceMessage::RaceFinished { results } => RaceEvent::RaceFinished(results),
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Encoding used on the reliable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// serde_json
    #[default]
    Json,
    /// bincode
    Binary,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" | "bincode" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

/// Encoding/decoding failures.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON encode/decode failed
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary encode/decode failed
    #[error("binary: {0}")]
    Binary(#[from] bincode::Error),
}

impl RaceMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Encode for the reliable channel.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
        Ok(match format {
            WireFormat::Json => serde_json::to_vec(self)?,
            WireFormat::Binary => self.to_bytes()?,
        })
    }

    /// Decode a reliable-channel payload.
    pub fn decode(data: &[u8], format: WireFormat) -> Result<Self, ProtocolError> {
        Ok(match format {
            WireFormat::Json => serde_json::from_slice(data)?,
            WireFormat::Binary => Self::from_bytes(data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ParticipantId;

    fn record(byte: u8, place: u32, elapsed: f64) -> FinishRecord {
        FinishRecord {
            participant: ParticipantId::new([byte; 16]),
            elapsed,
            place,
        }
    }

    #[test]
    fn test_json_shape() {
        let event = RaceEvent::player_finished(ParticipantId::new([1; 16]), 1, 10.25);
        let msg = RaceMessage::from(event);
        let json = msg.to_json().unwrap();
        assert!(json.starts_with("{\"player_finished\""));
        assert_eq!(RaceMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_both_formats_decode_final_results() {
        let event = RaceEvent::RaceFinished(vec![record(2, 1, 9.0), record(1, 2, 10.25)]);
        let msg = RaceMessage::from(event.clone());

        for format in [WireFormat::Json, WireFormat::Binary] {
            let bytes = msg.encode(format).unwrap();
            let decoded = RaceMessage::decode(&bytes, format).unwrap();
            assert_eq!(RaceEvent::from(decoded), event, "format {format}");
        }
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(
            RaceMessage::decode(b"not json", WireFormat::Json),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            RaceMessage::decode(&[0xff], WireFormat::Binary),
            Err(ProtocolError::Binary(_))
        ));
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("JSON".parse::<WireFormat>(), Ok(WireFormat::Json));
        assert_eq!("bincode".parse::<WireFormat>(), Ok(WireFormat::Binary));
        assert!("xml".parse::<WireFormat>().is_err());
    }
}
