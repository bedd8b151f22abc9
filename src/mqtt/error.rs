//! Error definitions for the bridge

use thiserror::Error;

/// Error types raised while relaying between broker and application
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Outbound command with an action the bridge does not know
    #[error("Invalid action data: {0}")]
    InvalidAction(serde_json::Value),

    /// Inbound payload that is not valid JSON
    #[error("Payload on '{topic}' is not valid JSON: {source}")]
    PayloadDecode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// Broker URL that cannot be turned into MQTT options
    #[error("Invalid broker url '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    /// Request could not be handed to the MQTT client
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The application side of a channel went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Reading commands from or writing messages to the application failed
    #[error("Port I/O error: {0}")]
    PortIo(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
