use rumqttc::{MqttOptions, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::BridgeError;

pub const DEFAULT_BROKER_URL: &str = "wss://traze.iteratec.de:9443";
pub const DEFAULT_NAMESPACE: &str = "traze";
pub const DEFAULT_GAMES_TOPIC: &str = "traze/games";
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Connection parameters for the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Capacity of the MQTT request queue and of the application channels
    pub channel_capacity: usize,
    /// Pause before the event loop is polled again after a connection error
    pub reconnect_delay_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            client_id: "traze-bridge".to_string(),
            keep_alive_secs: 30,
            channel_capacity: 100,
            reconnect_delay_ms: 1000,
            username: None,
            password: None,
        }
    }
}

/// Which topics the bridge listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub namespace: String,
    pub games: String,
    /// Re-issue command-created subscriptions after the broker connection was re-established
    pub resubscribe_on_reconnect: bool,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            games: DEFAULT_GAMES_TOPIC.to_string(),
            resubscribe_on_reconnect: true,
        }
    }
}

impl TopicConfig {
    /// `<namespace>/<name>/players`
    pub fn players_topic(&self, name: &str) -> String {
        format!("{}/{}/players", self.namespace, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Wss,
    Ws,
    Tcp,
    Tls,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Wss => 443,
            Scheme::Ws => 80,
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
        }
    }
}

/// Broker URL split into the parts rumqttc needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BrokerEndpoint {
    pub fn parse(url: &str) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidBrokerUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "wss" => Scheme::Wss,
            "ws" => Scheme::Ws,
            "mqtt" | "tcp" => Scheme::Tcp,
            "mqtts" | "ssl" => Scheme::Tls,
            _ => return Err(invalid("unsupported scheme")),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        // IPv6 literals come in brackets, `[::1]:1883`
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed
                    .split_once(']')
                    .ok_or_else(|| invalid("unclosed IPv6 bracket"))?;
                if rest.is_empty() {
                    (host, None)
                } else {
                    let port = rest.strip_prefix(':').ok_or_else(|| invalid("invalid port"))?;
                    (host, Some(port))
                }
            }
            None => match authority.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(invalid("IPv6 address must be in brackets"))
                }
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            },
        };
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => scheme.default_port(),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Address as rumqttc expects it: the full URL for websockets, the bare host otherwise.
    pub fn broker_addr(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.scheme {
            Scheme::Wss => format!("wss://{}:{}{}", host, self.port, self.path),
            Scheme::Ws => format!("ws://{}:{}{}", host, self.port, self.path),
            Scheme::Tcp | Scheme::Tls => self.host.clone(),
        }
    }

    fn transport(&self) -> Transport {
        match self.scheme {
            Scheme::Wss => Transport::wss_with_default_config(),
            Scheme::Ws => Transport::Ws,
            Scheme::Tcp => Transport::Tcp,
            Scheme::Tls => Transport::tls_with_default_config(),
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> Result<BrokerEndpoint, BridgeError> {
        BrokerEndpoint::parse(&self.url)
    }

    pub fn mqtt_options(&self) -> Result<MqttOptions, BridgeError> {
        let endpoint = self.endpoint()?;
        let mut mqtt_options =
            MqttOptions::new(self.client_id.clone(), endpoint.broker_addr(), endpoint.port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .set_transport(endpoint.transport());

        if let Some(user) = &self.username {
            mqtt_options.set_credentials(
                user.clone(),
                self.password.clone().unwrap_or_default(),
            );
        }

        // player lists of busy games exceed the 10 KiB default
        mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        Ok(mqtt_options)
    }
}
