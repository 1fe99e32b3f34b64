//! MQTT client construction for the broker channel.
//!
//! `ClientBuilder` turns a validated `ChannelConfig` plus a broker address
//! from the device API into a rumqttc `AsyncClient` and `EventLoop`. The
//! client sends publishes; the event loop belongs to the connection kernel.

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use uuid::Uuid;
use validator::Validate;

use super::{config::ChannelConfig, error::ChannelError};

/// Standard MQTT-over-TLS port, used when the device API omits one.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Splits a broker address of the form `host[:port]`.
pub fn parse_broker_address(address: &str) -> Result<(String, u16), ChannelError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                ChannelError::ClientSetup(format!("invalid broker port in '{address}'"))
            })?;
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_BROKER_PORT)),
        _ => Err(ChannelError::ClientSetup(format!(
            "invalid broker address '{address}'"
        ))),
    }
}

/// Builder for the channel's MQTT client.
pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
}

impl ClientBuilder {
    /// Creates a builder from the channel configuration and a broker
    /// address assigned by the device API.
    ///
    /// An empty `client_id` is replaced with a fresh UUID so concurrent
    /// devices never collide on the broker.
    ///
    /// # Errors
    ///
    /// Fails on configuration validation errors or an unparsable address.
    pub fn from_config(config: &ChannelConfig, address: &str) -> Result<Self, ChannelError> {
        config.validate()?;

        let client_id = if config.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            config.client_id.clone()
        };

        let (host, port) = parse_broker_address(address)?;

        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);

        Ok(Self {
            opts,
            cap: config.request_channel_capacity,
        })
    }

    /// Applies the pinned-CA TLS configuration to the transport.
    pub fn with_tls(mut self, tls: rustls::ClientConfig) -> Self {
        self.opts
            .set_transport(Transport::Tls(TlsConfiguration::Rustls(Arc::new(tls))));
        self
    }

    /// Constructs the client and its event loop, consuming the builder.
    pub fn build(self) -> (AsyncClient, EventLoop) {
        AsyncClient::new(self.opts, self.cap)
    }
}
