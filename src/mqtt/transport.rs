//! Broker transport port and the ESP-IDF adapter.
//!
//! The transport owns the socket and its own reconnect loop; the client
//! layer above only sees the resulting [`SessionEvent`]s. No backoff is
//! implemented here — the IDF MQTT client already paces reconnects.

use crate::error::MqttError;

// ── Wire-level types ──────────────────────────────────────────

/// Delivery guarantee for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Default QoS for application traffic.
pub const DEFAULT_QOS: Qos = Qos::AtLeastOnce;

/// Testament published by the broker if the session dies uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Session configuration, assembled from the `mqtt` store namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix for application topics (e.g. `home/node1/`).
    pub topic_base: String,
    pub keepalive_secs: u16,
    pub last_will: Option<LastWill>,
}

// ── Session events ────────────────────────────────────────────

/// Events the transport posts into the connectivity inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session established (initial connect or driver-managed reconnect).
    Connected,
    /// Session lost; the transport keeps retrying on its own.
    Disconnected,
    /// Inbound message on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// An outbound publish was acknowledged.
    Published,
    /// Unrecoverable transport error: the session handle is mid-teardown
    /// and must not be driven further.
    FatalError,
}

// ── Port ──────────────────────────────────────────────────────

/// Driven adapter over the platform MQTT client.
pub trait MqttTransport {
    /// Create the underlying client and begin connection attempts.
    fn start(&mut self, config: &BrokerConfig) -> Result<(), MqttError>;

    /// Issue a subscribe on the live session.
    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), MqttError>;

    /// Issue a publish on the live session.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), MqttError>;
}

// ── ESP-IDF adapter ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp_impl::EspMqttTransport;

#[cfg(target_os = "espidf")]
mod esp_impl {
    use std::sync::mpsc::Sender;
    use std::thread;
    use std::time::Duration;

    use esp_idf_svc::mqtt::client::{
        EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration, QoS,
    };
    use log::{error, info, warn};

    use super::{BrokerConfig, MqttError, MqttTransport, Qos, SessionEvent};

    fn esp_qos(qos: Qos) -> QoS {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }

    /// Transport over `EspMqttClient`. The connection half is drained on a
    /// dedicated thread that translates driver events into
    /// [`SessionEvent`]s for the connectivity inbox.
    pub struct EspMqttTransport {
        events: Sender<SessionEvent>,
        client: Option<EspMqttClient<'static>>,
    }

    impl EspMqttTransport {
        pub fn new(events: Sender<SessionEvent>) -> Self {
            Self {
                events,
                client: None,
            }
        }
    }

    impl MqttTransport for EspMqttTransport {
        fn start(&mut self, config: &BrokerConfig) -> Result<(), MqttError> {
            let mut cfg = MqttClientConfiguration {
                keep_alive_interval: Some(Duration::from_secs(u64::from(
                    config.keepalive_secs,
                ))),
                ..Default::default()
            };
            if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                cfg.username = Some(user.as_str());
                cfg.password = Some(pass.as_str());
            }
            if let Some(will) = &config.last_will {
                cfg.lwt = Some(LwtConfiguration {
                    topic: will.topic.as_str(),
                    payload: &will.payload,
                    qos: esp_qos(will.qos),
                    retain: will.retain,
                });
            }

            info!("mqtt(esp): connecting to {}", config.uri);
            let (client, mut connection) =
                EspMqttClient::new(&config.uri, &cfg).map_err(|e| {
                    error!("mqtt(esp): client init failed: {e}");
                    MqttError::Init
                })?;

            let events = self.events.clone();
            thread::Builder::new()
                .name("mqtt-events".into())
                .stack_size(6144)
                .spawn(move || {
                    while let Ok(event) = connection.next() {
                        let translated = match event.payload() {
                            EventPayload::Connected(_) => Some(SessionEvent::Connected),
                            EventPayload::Disconnected => Some(SessionEvent::Disconnected),
                            EventPayload::Received { topic, data, .. } => {
                                topic.map(|t| SessionEvent::Message {
                                    topic: t.to_string(),
                                    payload: data.to_vec(),
                                })
                            }
                            EventPayload::Published(_) => Some(SessionEvent::Published),
                            EventPayload::Error(e) => {
                                error!("mqtt(esp): transport error: {e}");
                                Some(SessionEvent::FatalError)
                            }
                            _ => None,
                        };
                        if let Some(ev) = translated {
                            if events.send(ev).is_err() {
                                break;
                            }
                        }
                    }
                    warn!("mqtt(esp): connection drained, event thread exiting");
                })
                .map_err(|_| MqttError::Init)?;

            self.client = Some(client);
            Ok(())
        }

        fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), MqttError> {
            let client = self.client.as_mut().ok_or(MqttError::NotConnected)?;
            client
                .subscribe(topic, esp_qos(qos))
                .map(|_| ())
                .map_err(|_| MqttError::Transport)
        }

        fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: Qos,
            retain: bool,
        ) -> Result<(), MqttError> {
            let client = self.client.as_mut().ok_or(MqttError::NotConnected)?;
            client
                .publish(topic, esp_qos(qos), retain, payload)
                .map(|_| ())
                .map_err(|_| MqttError::Transport)
        }
    }
}
