//! Dead-letter message envelope
//!
//! A [`DlqMessage`] is created when a message exhausts its retry budget (or
//! fails permanently) and is persisted into the dead-letter stream. It
//! carries the full attempt history so operators can diagnose the failure
//! and decide whether to reprocess or discard.
//!
//! The envelope is JSON on the wire. Payload bytes are base64-encoded so
//! arbitrary binary payloads survive the JSON boundary without inflating
//! into per-byte arrays.

use crate::error::FaultError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message that exhausted its retry budget
///
/// Persisted durably until explicitly reprocessed or purged. Reprocessing
/// resets the attempt count and re-enters the normal retry pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqMessage {
    /// Subject the message was originally published to
    pub original_subject: String,
    /// Original payload bytes (base64 in the JSON encoding)
    #[serde(with = "payload_b64")]
    pub payload: Bytes,
    /// Number of handler invocations before dead-lettering
    pub attempt_count: u32,
    /// Wall-clock time of the first handler invocation
    pub first_attempt_at: DateTime<Utc>,
    /// Wall-clock time of the final, failing handler invocation
    pub last_attempt_at: DateTime<Utc>,
    /// Rendering of the final error
    pub error_message: String,
    /// Debug rendering of the final error (cause-chain analog)
    pub error_chain: String,
    /// When the message was written to the dead-letter stream
    pub dead_lettered_at: DateTime<Utc>,
}

impl DlqMessage {
    /// Serialize to the JSON wire form used in the dead-letter stream
    pub fn to_bytes(&self) -> Result<Bytes, FaultError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| FaultError::Broker(format!("failed to encode DLQ message: {e}")))
    }

    /// Deserialize from the JSON wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FaultError> {
        serde_json::from_slice(bytes)
            .map_err(|e| FaultError::Broker(format!("failed to decode DLQ message: {e}")))
    }
}

mod payload_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(de)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_message() -> DlqMessage {
        let now = Utc::now();
        DlqMessage {
            original_subject: "orders.created".to_string(),
            payload: Bytes::from_static(&[0x00, 0xff, 0x42]),
            attempt_count: 3,
            first_attempt_at: now,
            last_attempt_at: now,
            error_message: "handler failed: db unavailable".to_string(),
            error_chain: "Handler(\"db unavailable\")".to_string(),
            dead_lettered_at: now,
        }
    }

    #[test]
    fn test_round_trips_binary_payload() {
        let msg = make_message();
        let bytes = msg.to_bytes().unwrap();
        let decoded = DlqMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_payload_is_base64_in_json() {
        let msg = make_message();
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        // Not a JSON byte array - a compact base64 string
        assert!(json["payload"].is_string());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = DlqMessage::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, FaultError::Broker(_)));
    }
}
