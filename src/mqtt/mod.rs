//! Broker session client.
//!
//! Owns the subscription set and the connected/poisoned session flags.
//! Subscriptions registered before [`MqttClient::start`] are replayed in
//! registration order on **every** transition into Connected; ones added
//! afterwards only join the replay set, taking effect on the next
//! reconnect — an open session is never retroactively subscribed.
//!
//! Publishing without a live session fails with `NotConnected` and puts
//! nothing on the wire. Once the transport reports a fatal error the
//! session is poisoned: no further events are dispatched for it, so
//! nothing drives a client handle that is mid-teardown.

pub mod transport;

use log::{info, warn};

use crate::error::{MqttError, StoreError};
use crate::store::medium::StorageMedium;
use crate::store::{NamespaceHandle, OpenMode};
use self::transport::{BrokerConfig, MqttTransport, Qos, SessionEvent};

pub use self::transport::{DEFAULT_QOS, LastWill};

/// Store namespace holding the broker settings.
pub const STORE_NAMESPACE: &str = "mqtt";

// ── Config loading ────────────────────────────────────────────

impl BrokerConfig {
    /// Assemble the session configuration from the `mqtt` namespace.
    /// `broker` and `topic-base` are required; credentials are optional
    /// and only used when both halves are present.
    pub fn from_store<M: StorageMedium>(
        store: &crate::store::ConfigStore<M>,
        keepalive_secs: u16,
        last_will: Option<LastWill>,
    ) -> Result<Self, MqttError> {
        let handle: NamespaceHandle<M> = store
            .open(STORE_NAMESPACE, OpenMode::ReadOnly)
            .map_err(|_| MqttError::MissingConfig("broker"))?;

        let uri = handle
            .get_string("broker")
            .map_err(|_| MqttError::MissingConfig("broker"))?;
        let topic_base = handle
            .get_string("topic-base")
            .map_err(|_| MqttError::MissingConfig("topic-base"))?;

        let optional = |key: &str| match handle.get_string(key) {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(StoreError::NotFound) => None,
            Err(e) => {
                warn!("mqtt: ignoring unreadable '{key}' setting ({e})");
                None
            }
        };
        let username = optional("username");
        let password = optional("password");

        Ok(Self {
            uri,
            username,
            password,
            topic_base,
            keepalive_secs,
            last_will,
        })
    }
}

// ── Inbound application message ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

// ── Client ────────────────────────────────────────────────────

pub struct MqttClient<T: MqttTransport> {
    transport: T,
    config: Option<BrokerConfig>,
    /// Registration-ordered replay set.
    subscriptions: Vec<(String, Qos)>,
    connected: bool,
    started: bool,
    poisoned: bool,
}

impl<T: MqttTransport> MqttClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: None,
            subscriptions: Vec::new(),
            connected: false,
            started: false,
            poisoned: false,
        }
    }

    pub fn configure(&mut self, config: BrokerConfig) {
        self.config = Some(config);
    }

    /// Prefix an application topic with the configured base.
    pub fn prefixed(&self, topic: &str) -> String {
        match &self.config {
            Some(cfg) => format!("{}{}", cfg.topic_base, topic),
            None => topic.to_string(),
        }
    }

    /// Register a subscription for replay. Before `start` this covers the
    /// first connect; afterwards it only applies from the next reconnect.
    pub fn add_subscription(&mut self, topic: &str, qos: Qos) {
        if self.started {
            info!("mqtt: subscription '{topic}' queued for next reconnect");
        }
        self.subscriptions.push((topic.to_string(), qos));
    }

    /// Begin connection attempts. Reconnects after this point are owned by
    /// the transport; this client only tracks the resulting state.
    pub fn start(&mut self) -> Result<(), MqttError> {
        let config = self.config.as_ref().ok_or(MqttError::MissingConfig("broker"))?;
        self.transport.start(config)?;
        self.started = true;
        info!("mqtt: started ({})", config.uri);
        Ok(())
    }

    /// Publish to an already-prefixed topic.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), MqttError> {
        if !self.connected || self.poisoned {
            return Err(MqttError::NotConnected);
        }
        self.transport.publish(topic, payload, qos, retain)
    }

    /// Process one transport event. Returns an inbound application
    /// message when there is one to route.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<InboundMessage> {
        if self.poisoned {
            // Session guard: a fatal error already tore this session down.
            return None;
        }
        match event {
            SessionEvent::Connected => {
                self.connected = true;
                info!("mqtt: connected");
                self.replay_subscriptions();
                None
            }
            SessionEvent::Disconnected => {
                info!("mqtt: disconnected");
                self.connected = false;
                None
            }
            SessionEvent::Message { topic, payload } => {
                Some(InboundMessage { topic, payload })
            }
            SessionEvent::Published => None,
            SessionEvent::FatalError => {
                warn!("mqtt: fatal transport error, poisoning session");
                self.connected = false;
                self.poisoned = true;
                None
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Replay every registered subscription in registration order. An
    /// individual failure is logged and skipped; the remainder still
    /// replays.
    fn replay_subscriptions(&mut self) {
        for (topic, qos) in &self.subscriptions {
            info!("mqtt: subscribing to {topic}");
            if let Err(e) = self.transport.subscribe(topic, *qos) {
                warn!("mqtt: subscribe '{topic}' failed ({e}), continuing replay");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
