//! Reply DTOs
//!
//! Wire format: `{"kind": "log", "data": "<text>"}` or
//! `{"kind": "status", "data": true|false}`.

use serde::{Deserialize, Serialize};

use crate::domain::reply::ReplyMessage;

/// Body of a message published on a reply destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ReplyPayload {
    Log(String),
    Status(bool),
}

impl ReplyPayload {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

impl From<ReplyPayload> for ReplyMessage {
    fn from(payload: ReplyPayload) -> Self {
        match payload {
            ReplyPayload::Log(text) => ReplyMessage::LogLine { text },
            ReplyPayload::Status(success) => ReplyMessage::StatusResult { success },
        }
    }
}

impl From<ReplyMessage> for ReplyPayload {
    fn from(message: ReplyMessage) -> Self {
        match message {
            ReplyMessage::LogLine { text } => ReplyPayload::Log(text),
            ReplyMessage::StatusResult { success } => ReplyPayload::Status(success),
        }
    }
}

/// Decodes a raw reply body into a domain message
pub fn decode_reply(body: &[u8]) -> serde_json::Result<ReplyMessage> {
    ReplyPayload::from_bytes(body).map(ReplyMessage::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_log() {
        let msg = decode_reply(br#"{"kind":"log","data":"cargo test ... ok"}"#).unwrap();
        assert_eq!(msg, ReplyMessage::log("cargo test ... ok"));
    }

    #[test]
    fn test_decode_status() {
        assert_eq!(
            decode_reply(br#"{"kind":"status","data":true}"#).unwrap(),
            ReplyMessage::status(true)
        );
        assert_eq!(
            decode_reply(br#"{"kind":"status","data":false}"#).unwrap(),
            ReplyMessage::status(false)
        );
    }

    #[test]
    fn test_encode_matches_wire_format() {
        let body = ReplyPayload::from(ReplyMessage::status(true)).to_bytes().unwrap();
        assert_eq!(body, br#"{"kind":"status","data":true}"#);

        let body = ReplyPayload::from(ReplyMessage::log("hi")).to_bytes().unwrap();
        assert_eq!(body, br#"{"kind":"log","data":"hi"}"#);
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        let bodies: [&[u8]; 6] = [
            b"not json",
            br#"{"kind":"status","data":"yes"}"#,
            br#"{"kind":"log","data":false}"#,
            br#"{"kind":"progress","data":50}"#,
            br#"{"data":true}"#,
            b"",
        ];
        for body in bodies {
            assert!(decode_reply(body).is_err(), "accepted {:?}", body);
        }
    }
}
