//! # MQTT Bridge Module
//!
//! Connects to the Traze broker and relays traffic in both directions between the
//! broker and the application sitting behind the bridge channels.
//!
//! ## Message Flow
//!
//! ```text
//! application ─[{"action": ...}]──▶ Bridge ─subscribe──▶ broker
//! application ◀─[{topic, payload}]─ Bridge ◀─publish──── broker
//! ```
//!
//! On every successful connection the bridge subscribes to the games feed
//! (`traze/games`). A `spectateGame` command from the application adds a
//! subscription to `traze/<name>/players`. Every publish on a subscribed topic is
//! decoded as JSON and handed to the application as an [`InboundMessage`].
//!
//! ## Module Layout
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker and topic configuration, URL handling
//! ├── error.rs            - Error type shared by the bridge
//! ├── message_manager.rs  - Inbound messages and outbound commands
//! └── mqtt_handler.rs     - Event loop, relaying and status reporting
//! ```
//!
//! ## Failure Handling
//!
//! - Commands with an unknown action are logged and dropped
//! - Payloads that are not JSON are logged and dropped
//! - Broker connection errors are logged; the event loop is polled again after
//!   a short delay, which lets rumqttc reconnect
//! - A closed inbound channel ends the bridge task
//!
//! [`InboundMessage`]: message_manager::InboundMessage

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
