//! Publishing packets to an MQTT broker.
//!
//! Each packet becomes one MQTT message on a fixed topic, payload untouched.
//! The network side runs on its own thread, which keeps reconnecting while
//! the broker is unreachable; `publish` only queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectionError, Event, MqttOptions, Outgoing, Packet as MqttPacket, QoS};
use tlmrelay_frame::Packet;
use tracing::{debug, info, warn};

use crate::codec::DEFAULT_TOPIC;
use crate::error::{Result, SinkError};
use crate::sink::PacketSink;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CLOSE_POLL: Duration = Duration::from_millis(50);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Requests queued while the broker is slow or unreachable.
    pub queue_capacity: usize,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            client_id: format!("tlmrelay-{}", std::process::id()),
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Username and password for the broker. A missing password is sent empty.
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    fn check(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SinkError::Broker("broker address is empty".to_string()));
        }
        check_publish_topic(&self.topic)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or(""));
        }
        options
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_TOPIC)
    }
}

/// Topics published to must be non-empty and carry no wildcards.
pub fn check_publish_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(SinkError::InvalidTopic("topic is empty".to_string()));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(SinkError::InvalidTopic(format!(
            "{topic:?}: wildcards are not allowed when publishing"
        )));
    }
    if topic.len() > usize::from(u16::MAX) {
        return Err(SinkError::TopicTooLong {
            len: topic.len(),
            max: usize::from(u16::MAX),
        });
    }
    Ok(())
}

/// A [`PacketSink`] that publishes every packet to an MQTT topic.
pub struct MqttPublisher {
    client: Client,
    topic: String,
    qos: QoS,
    closing: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    published: u64,
    closed: bool,
}

impl MqttPublisher {
    /// Start the client. Returns once the network thread is running; the
    /// broker connection is made in the background.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        config.check()?;

        let (client, mut connection) = Client::new(config.options(), config.queue_capacity);
        let closing = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let worker = {
            let closing = Arc::clone(&closing);
            let connected = Arc::clone(&connected);
            let broker = format!("{}:{}", config.host, config.port);
            thread::Builder::new()
                .name("tlmrelay-mqtt".to_string())
                .spawn(move || {
                    for notification in connection.iter() {
                        match notification {
                            Ok(Event::Incoming(MqttPacket::ConnAck(_))) => {
                                connected.store(true, Ordering::SeqCst);
                                info!(%broker, "connected to broker");
                            }
                            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                            Ok(event) => debug!(?event, "mqtt event"),
                            Err(ConnectionError::RequestsDone) => break,
                            Err(err) => {
                                connected.store(false, Ordering::SeqCst);
                                if closing.load(Ordering::SeqCst) {
                                    break;
                                }
                                warn!(%broker, error = %err, "broker connection failed; retrying");
                                if !sleep_unless_closing(&closing, RECONNECT_DELAY) {
                                    break;
                                }
                            }
                        }
                    }
                    debug!("mqtt network thread finished");
                })
                .map_err(SinkError::Io)?
        };

        info!(
            broker = %format!("{}:{}", config.host, config.port),
            topic = %config.topic,
            client_id = %config.client_id,
            "mqtt publisher started"
        );

        Ok(Self {
            client,
            topic: config.topic.clone(),
            qos: config.qos,
            closing,
            connected,
            worker: Some(worker),
            published: 0,
            closed: false,
        })
    }

    /// Topic every packet is published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Packets handed to the client so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// Returns false when closing was requested during the wait.
fn sleep_unless_closing(closing: &AtomicBool, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if closing.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(CLOSE_POLL);
    }
    !closing.load(Ordering::SeqCst)
}

impl PacketSink for MqttPublisher {
    fn publish(&mut self, packet: &Packet) -> Result<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.client
            .try_publish(self.topic.as_str(), self.qos, false, packet.as_bytes().to_vec())
            .map_err(|err| SinkError::Broker(err.to_string()))?;
        self.published = self.published.saturating_add(1);
        debug!(topic = %self.topic, size = packet.as_bytes().len(), "queued packet for broker");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.closing.store(true, Ordering::SeqCst);

        if let Err(err) = self.client.try_disconnect() {
            debug!(error = %err, "disconnect request not queued");
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("mqtt network thread panicked");
            }
        }
        info!(topic = %self.topic, published = self.published, "mqtt publisher closed");
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn config_defaults_match_plain_broker() {
        let config = MqttConfig::new("broker.local", "car/telemetry");
        assert_eq!(config.port, 1883);
        assert_eq!(config.qos, QoS::AtMostOnce);
        assert!(config.client_id.starts_with("tlmrelay-"));
        assert!(config.username.is_none());
    }

    #[test]
    fn credentials_are_applied_to_options() {
        let config = MqttConfig::new("broker.local", "t")
            .with_port(8883)
            .with_credentials("car", Some("secret".to_string()));
        let options = config.options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(
            options.credentials(),
            Some(("car".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn wildcard_topics_rejected() {
        assert!(check_publish_topic("car/telemetry").is_ok());
        assert!(matches!(
            check_publish_topic("car/+"),
            Err(SinkError::InvalidTopic(_))
        ));
        assert!(matches!(
            check_publish_topic(""),
            Err(SinkError::InvalidTopic(_))
        ));

        let config = MqttConfig::new("broker.local", "car/#");
        assert!(matches!(
            MqttPublisher::connect(&config),
            Err(SinkError::InvalidTopic(_))
        ));
    }

    #[test]
    fn unreachable_broker_queues_and_closes() {
        let config = MqttConfig::new("127.0.0.1", "car/telemetry").with_port(unused_port());
        let mut publisher = MqttPublisher::connect(&config).unwrap();

        let started = Instant::now();
        publisher.publish(&Packet::from(vec![1, 2, 3])).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(publisher.published(), 1);
        assert!(!publisher.is_connected());

        publisher.close().unwrap();
        publisher.close().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let err = publisher.publish(&Packet::from(vec![4])).unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[test]
    fn full_queue_is_reported_not_blocked_on() {
        let mut config = MqttConfig::new("127.0.0.1", "car/telemetry").with_port(unused_port());
        config.queue_capacity = 1;
        let mut publisher = MqttPublisher::connect(&config).unwrap();

        let started = Instant::now();
        let mut rejected = None;
        for _ in 0..64 {
            if let Err(err) = publisher.publish(&Packet::from(vec![0u8; 8])) {
                rejected = Some(err);
                break;
            }
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(rejected, Some(SinkError::Broker(_))));
        publisher.close().unwrap();
    }
}
