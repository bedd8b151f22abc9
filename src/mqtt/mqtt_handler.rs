use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Packet, QoS};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::{BrokerConfig, TopicConfig};
use super::error::BridgeError;
use super::message_manager::{Command, InboundMessage, MsgManager};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

/// Counters and connection state of a running bridge, published on every change.
#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    pub messages_relayed: usize,
    pub decode_failures: usize,
    /// Messages dropped because the application was not keeping up
    pub messages_dropped: usize,
    pub subscriptions_issued: usize,
    pub commands_rejected: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// The part of the MQTT client the bridge needs.
///
/// Requests are queued without waiting: the same task drives the event loop,
/// so awaiting a full request queue here would never resolve.
pub trait Subscriber {
    fn request_subscribe(&self, topic: &str) -> Result<(), BridgeError>;
    fn request_disconnect(&self) -> Result<(), BridgeError>;
}

impl Subscriber for AsyncClient {
    fn request_subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.try_subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }

    fn request_disconnect(&self) -> Result<(), BridgeError> {
        self.try_disconnect()?;
        Ok(())
    }
}

/// Relays broker messages to the application and application commands to the broker.
pub struct Bridge<S: Subscriber> {
    client: S,
    topics: TopicConfig,
    inbound: mpsc::Sender<InboundMessage>,
    /// Players topics to restore after a reconnect
    spectated: BTreeSet<String>,
    /// Players topics requested while offline; their queued request goes out on reconnect
    pending: BTreeSet<String>,
    has_connected: bool,
    status: BridgeStatus,
    status_tx: watch::Sender<BridgeStatus>,
}

impl<S: Subscriber> Bridge<S> {
    pub fn new(
        client: S,
        topics: TopicConfig,
        inbound: mpsc::Sender<InboundMessage>,
        status_tx: watch::Sender<BridgeStatus>,
    ) -> Self {
        Bridge {
            client,
            topics,
            inbound,
            spectated: BTreeSet::new(),
            pending: BTreeSet::new(),
            has_connected: false,
            status: BridgeStatus::default(),
            status_tx,
        }
    }

    /// Handles one event coming out of the broker event loop.
    ///
    /// Never waits on the application: a full inbound channel drops the message.
    pub fn on_event(&mut self, event: &Event) -> Result<(), BridgeError> {
        match event {
            // rumqttc reports refused connections as errors, a ConnAck event is always a success
            Event::Incoming(Packet::ConnAck(_)) => {
                self.on_connected();
                Ok(())
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.relay(&publish.topic, &publish.payload)
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker sent disconnect");
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            other => {
                trace!("Ignoring broker event {:?}", other);
                Ok(())
            }
        }
    }

    /// Records an error returned by the event loop.
    pub fn on_connection_error(&mut self, err: &ConnectionError) {
        match err {
            ConnectionError::ConnectionRefused(code) => {
                error!("Broker refused connection: {:?}", code);
                self.set_state(ConnectionState::Failed);
            }
            other => {
                error!("Broker connection error: {}", other);
                self.set_state(ConnectionState::Reconnecting);
            }
        }
    }

    fn on_connected(&mut self) {
        let reconnect = self.has_connected;
        self.has_connected = true;
        self.set_state(ConnectionState::Connected);
        info!("Connected to broker, subscribing to {}", self.topics.games);

        let games = self.topics.games.clone();
        if let Err(e) = self.subscribe(&games) {
            error!("Failed to subscribe to {}: {}", games, e);
        }

        if reconnect && self.topics.resubscribe_on_reconnect {
            let spectated: Vec<String> = self
                .spectated
                .difference(&self.pending)
                .cloned()
                .collect();
            for topic in spectated {
                debug!("Resubscribing to {}", topic);
                if let Err(e) = self.subscribe(&topic) {
                    error!("Failed to resubscribe to {}: {}", topic, e);
                }
            }
        }

        let pending = std::mem::take(&mut self.pending);
        self.spectated.extend(pending);
    }

    fn relay(&mut self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        let msg = match InboundMessage::decode(topic, payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping message: {}", e);
                self.status.decode_failures += 1;
                self.touch();
                return Ok(());
            }
        };
        debug!("Message received: {}", msg);

        match self.inbound.try_send(msg) {
            Ok(()) => self.status.messages_relayed += 1,
            Err(TrySendError::Full(msg)) => {
                warn!("Application is not keeping up, dropping {}", msg.topic);
                self.status.messages_dropped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                return Err(BridgeError::ChannelClosed("inbound".to_string()));
            }
        }
        self.touch();
        Ok(())
    }

    /// Handles one command coming from the application.
    ///
    /// Unknown actions are logged and dropped, the sender is not told.
    pub fn on_command(&mut self, data: serde_json::Value) -> Result<(), BridgeError> {
        debug!("Data received from application: {}", data);

        match Command::from_value(&data) {
            Ok(Command::SpectateGame { name }) => {
                let topic = self.topics.players_topic(&name);
                info!("Spectating game {} on {}", name, topic);
                self.subscribe(&topic)?;
                if self.status.connection_state == ConnectionState::Connected {
                    self.spectated.insert(topic);
                } else {
                    self.pending.insert(topic);
                }
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                self.status.commands_rejected += 1;
                self.touch();
                Ok(())
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        self.client.request_subscribe(topic)?;
        self.status.subscriptions_issued += 1;
        self.touch();
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.status.connection_state != state {
            debug!(
                "Connection state {:?} -> {:?}",
                self.status.connection_state, state
            );
        }
        self.status.connection_state = state;
        self.touch();
    }

    fn touch(&mut self) {
        self.status.last_activity = Some(Local::now());
        self.status_tx.send_replace(self.status.clone());
    }
}

impl Bridge<AsyncClient> {
    /// Builds the MQTT client for `broker` and runs the bridge on its own task.
    pub fn spawn(
        broker: &BrokerConfig,
        topics: TopicConfig,
        msg_manager: MsgManager,
        cancel: CancellationToken,
    ) -> Result<BridgeHandle, BridgeError> {
        let mqtt_options = broker.mqtt_options()?;
        info!("Connecting to broker {}", broker.url);

        let (client, eventloop) = AsyncClient::new(mqtt_options, broker.channel_capacity);
        let (status_tx, status_rx) = watch::channel(BridgeStatus::default());
        let reconnect_delay = Duration::from_millis(broker.reconnect_delay_ms);

        let MsgManager { inbound, outbound } = msg_manager;
        let mut bridge = Bridge::new(client, topics, inbound, status_tx);
        bridge.set_state(ConnectionState::Connecting);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = bridge
                .run(eventloop, outbound, reconnect_delay, task_cancel)
                .await;
            if let Err(e) = &result {
                error!("Bridge stopped: {}", e);
            }
            result
        });

        Ok(BridgeHandle {
            task,
            status: status_rx,
            cancel,
        })
    }

    async fn run(
        &mut self,
        mut eventloop: EventLoop,
        mut outbound: mpsc::Receiver<serde_json::Value>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        let mut outbound_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutting down bridge");
                    if let Err(e) = self.client.request_disconnect() {
                        warn!("Disconnect request failed: {}", e);
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(event) => match self.on_event(&event) {
                        Err(e @ BridgeError::ChannelClosed(_)) => return Err(e),
                        Err(e) => error!("Failed to handle broker event: {}", e),
                        Ok(()) => {}
                    },
                    Err(e) => {
                        self.on_connection_error(&e);
                        tokio::select! {
                            _ = sleep(reconnect_delay) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                },
                command = outbound.recv(), if outbound_open => match command {
                    Some(data) => {
                        if let Err(e) = self.on_command(data) {
                            error!("Failed to handle command: {}", e);
                        }
                    }
                    None => {
                        info!("Application closed the command channel");
                        outbound_open = false;
                    }
                },
            }
        }
    }
}

/// Handle to a bridge running on its own task.
pub struct BridgeHandle {
    task: JoinHandle<Result<(), BridgeError>>,
    status: watch::Receiver<BridgeStatus>,
    cancel: CancellationToken,
}

impl BridgeHandle {
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }

    /// Stops the bridge and waits for its task.
    pub async fn shutdown(self) -> Result<(), BridgeError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the bridge task without stopping it.
    pub async fn join(self) -> Result<(), BridgeError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(BridgeError::ChannelClosed(format!("bridge task: {}", e))),
        }
    }
}
