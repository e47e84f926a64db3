//! Delivery side of tlmrelay.
//!
//! A [`PacketSink`] accepts validated packets. With the `mqtt` feature,
//! [`MqttPublisher`] publishes each one to a broker topic. [`BusPublisher`]
//! publishes onto a local message bus instead: a Unix domain socket carrying
//! envelopes of
//! - A 2-byte magic number ("TR")
//! - A 2-byte little-endian topic length
//! - A 4-byte little-endian payload length
//! - The UTF-8 topic, then the payload

pub mod codec;
pub mod error;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod publisher;
pub mod reader;
pub mod sink;

pub use codec::{
    decode_envelope, encode_envelope, Envelope, DEFAULT_MAX_PAYLOAD, DEFAULT_TOPIC, HEADER_SIZE,
};
pub use error::{Result, SinkError};
#[cfg(feature = "mqtt")]
pub use mqtt::{check_publish_topic, MqttConfig, MqttPublisher, DEFAULT_MQTT_PORT};
pub use publisher::{BusPublisher, DEFAULT_WRITE_TIMEOUT};
#[cfg(feature = "mqtt")]
pub use rumqttc::QoS;
pub use reader::BusReader;
pub use sink::PacketSink;
