use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use super::error::BridgeError;

const PREVIEW_LEN: usize = 64;

/// A broker message on its way into the application.
///
/// Serialises as exactly `{"topic": ..., "payload": ...}`; the receive time is
/// kept for logging only.
#[derive(Debug, Clone, Serialize)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload,
            received_at: Local::now(),
        }
    }

    /// Decodes a raw publish payload as JSON and pairs it with its topic.
    pub fn decode(topic: &str, bytes: &[u8]) -> Result<Self, BridgeError> {
        let payload =
            serde_json::from_slice(bytes).map_err(|source| BridgeError::PayloadDecode {
                topic: topic.to_string(),
                source,
            })?;
        Ok(Self::new(topic, payload))
    }

    pub fn preview(&self) -> String {
        let content = self.payload.to_string();
        let mut preview: String = content.chars().take(PREVIEW_LEN).collect();
        if content.chars().count() > PREVIEW_LEN {
            preview.push_str("...");
        }
        format!(
            "{} {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview
        )
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.preview())
    }
}

/// Commands the application can send to the bridge.
///
/// Wire shape is `{"action": "...", ...}`; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    /// Follow the players feed of one game
    #[serde(rename = "spectateGame")]
    SpectateGame { name: String },
}

impl Command {
    /// Recognises a raw command. Anything that is not a known action comes back
    /// as [`BridgeError::InvalidAction`] carrying the original value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, BridgeError> {
        Command::deserialize(value).map_err(|_| BridgeError::InvalidAction(value.clone()))
    }
}

/// Both ends of the application boundary, as seen from the bridge.
pub struct MsgManager {
    pub inbound: mpsc::Sender<InboundMessage>,
    pub outbound: mpsc::Receiver<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_pairs_topic_and_json_payload() {
        let msg = InboundMessage::decode("traze/games", br#"[{"name":"1","activePlayers":3}]"#)
            .expect("valid json");

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"topic": "traze/games", "payload": [{"name": "1", "activePlayers": 3}]})
        );
    }

    #[test]
    fn decode_rejects_non_json() {
        let err = InboundMessage::decode("traze/games", b"not json").unwrap_err();
        match err {
            BridgeError::PayloadDecode { topic, .. } => assert_eq!(topic, "traze/games"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn scalar_payloads_are_kept_as_is() {
        let msg = InboundMessage::decode("traze/1/players", b"42").unwrap();
        assert_eq!(msg.payload, json!(42));
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = "x".repeat(200);
        let msg = InboundMessage::new("t", json!(long));
        let preview = msg.preview();
        assert!(preview.ends_with("..."));
        assert!(preview.len() < 120);
        assert!(preview.contains(" t: "));
    }

    #[test]
    fn display_is_the_preview() {
        let msg = InboundMessage::new("traze/games", json!([{"name": "1"}]));
        assert_eq!(msg.to_string(), msg.preview());
    }

    #[test]
    fn spectate_game_is_recognised() {
        let cmd = Command::from_value(&json!({"action": "spectateGame", "name": "abc"})).unwrap();
        assert_eq!(
            cmd,
            Command::SpectateGame {
                name: "abc".to_string()
            }
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let cmd =
            Command::from_value(&json!({"action": "spectateGame", "name": "g", "x": 1})).unwrap();
        assert!(matches!(cmd, Command::SpectateGame { .. }));
    }

    #[test]
    fn unknown_action_is_rejected_with_raw_value() {
        let raw = json!({"action": "joinGame", "name": "abc"});
        match Command::from_value(&raw) {
            Err(BridgeError::InvalidAction(value)) => assert_eq!(value, raw),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_commands_are_rejected() {
        for raw in [
            json!({"name": "abc"}),
            json!({"action": "spectateGame"}),
            json!({"action": "spectateGame", "name": 7}),
            json!("spectateGame"),
        ] {
            assert!(matches!(
                Command::from_value(&raw),
                Err(BridgeError::InvalidAction(_))
            ));
        }
    }
}
