//! MQTT 3.1.1 session client.
//!
//! The IoT Hub MQTT transport drives a [`Client`] through the
//! [`MqttSession`](crate::transport::mqtt::MqttSession) seam. The client
//! itself only knows packets; topic grammar and request correlation live in
//! [`crate::transport::mqtt`].

/// MQTT client implementation and supporting types.
pub mod client;

pub use client::{Client, MAX_TOPIC_LEN, Options, PublishPacket, QoS};
