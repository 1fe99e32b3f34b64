//! petrel-broker — secure delivery channel for the petrel agent
//!
//! This crate owns everything between the agent and its broker:
//!
//! * `provision` — Device API client: broker/topic discovery and
//!   certificate bundle retrieval.
//! * `tls` — Pinned-CA TLS configuration with relaxed hostname checking.
//! * `client` — rumqttc client construction from channel configuration.
//! * `connection` — Event loop kernel tracking link state.
//! * `publisher` — JSON publisher gated on the link flag.
//! * `config` — Channel tunables and the device topic assignment.
//!
//! `bootstrap` runs the whole sequence once at startup. If any step fails
//! the caller gets an error and runs without delivery; the channel is never
//! re-bootstrapped within a process.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod provision;
pub mod publisher;
pub mod tls;

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use client::ClientBuilder;
pub use config::{BrokerConfig, Channel, ChannelConfig, TopicMap};
pub use connection::ConnectionKernel;
pub use error::ChannelError;
pub use provision::{CredentialPaths, Provisioner};
pub use publisher::Publisher;

/// A live broker channel: the publisher plus the topic assignment it serves.
pub struct BrokerChannel {
    pub publisher: Publisher,
    pub topics: TopicMap,
    cancel: CancellationToken,
}

impl BrokerChannel {
    /// Token that stops the connection kernel on shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// One-shot channel bootstrap.
///
/// Fetches the device configuration, materializes the credential bundle,
/// builds the TLS client against the first assigned broker, and spawns the
/// connection kernel.
///
/// # Errors
///
/// Any step failing returns the error without side effects on the caller;
/// the agent is expected to log it and continue with delivery disabled.
pub async fn bootstrap(
    base_url: &str,
    api_key: &str,
    credential_dir: &Path,
    config: &ChannelConfig,
) -> Result<BrokerChannel, ChannelError> {
    let provisioner = Provisioner::new(base_url, api_key)?;
    let broker_config = provisioner.fetch_broker_config().await?;
    let paths = provisioner.fetch_credentials(credential_dir).await?;

    let tls = tls::client_config(&paths)?;
    let address = &broker_config.brokers[0];
    let (client, event_loop) = ClientBuilder::from_config(config, address)?
        .with_tls(tls)
        .build();

    let cancel = CancellationToken::new();
    let mut kernel = ConnectionKernel::new(client.clone(), event_loop, cancel.clone());
    let connected = kernel.is_connected();

    tokio::spawn(async move {
        if let Err(e) = kernel.run().await {
            error!("Broker connection kernel exited: {e}");
        }
    });

    info!("Broker channel started against {}", address);
    Ok(BrokerChannel {
        publisher: Publisher::new(client, connected),
        topics: broker_config.topics,
        cancel,
    })
}
