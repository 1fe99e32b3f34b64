//! Configuration structures for the broker channel.
//!
//! Two kinds of configuration live here. `ChannelConfig` holds the static
//! MQTT tunables loaded from the agent's TOML file and validated with the
//! `validator` crate. `BrokerConfig` and `TopicMap` are assigned by the
//! device API at bootstrap and are immutable once fetched.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Logical channels a record can be delivered on.
///
/// The device API assigns one broker topic per channel; callers pick the
/// channel and never deal with topic strings directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Periodic metric reports.
    Monitoring,
    /// Error events carrying a stack trace.
    Event,
    /// Application log lines.
    Log,
}

/// Topic names for each logical channel, as assigned by the device API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMap {
    pub monitoring: String,
    pub event: String,
    pub log: String,
}

impl TopicMap {
    /// Returns the broker topic backing a logical channel.
    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Monitoring => &self.monitoring,
            Channel::Event => &self.event,
            Channel::Log => &self.log,
        }
    }
}

/// Broker endpoints and topic assignment fetched from the device API.
///
/// `brokers` is ordered by the API; the first entry is used. Addresses are
/// `host[:port]`, defaulting to the standard MQTT-over-TLS port.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub topics: TopicMap,
}

/// Static tunables for the MQTT connection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChannelConfig {
    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Whether to request a clean session from the broker.
    pub clean_session: bool,

    /// Capacity of the client's internal request queue.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Request channel capacity must be between 1 and 1000"
    ))]
    pub request_channel_capacity: usize,

    /// Client identifier presented to the broker.
    ///
    /// An empty string means a UUID is generated at connection time.
    #[validate(length(max = 36, message = "Client ID must not exceed 36 characters"))]
    pub client_id: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            keep_alive: 60,
            clean_session: true,
            request_channel_capacity: 100,
            client_id: String::new(),
        }
    }
}
