//! Error handling for broker channel operations.
//!
//! This module defines `ChannelError`, the unified error type for everything
//! the channel does: device API provisioning, credential handling, TLS setup,
//! client construction, and publishing. Any of these failing disables delivery
//! for the process; none of them should ever take the host application down.

use thiserror::Error;

/// The unified error type for broker channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Device API returned a well-formed but unusable response.
    ///
    /// Examples: empty broker list, redirect without a Location header.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// HTTP request to the device API failed.
    #[error("Device API request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Device API answered with a non-success status code.
    #[error("Device API returned status {status} for {endpoint}")]
    ApiStatus { endpoint: String, status: u16 },

    /// Certificate bundle archive could not be read.
    #[error("Credential archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A required credential file was absent from the extracted bundle.
    #[error("Credential entry missing from archive: {0}")]
    MissingCredential(String),

    /// TLS configuration could not be built from the credential bundle.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// MQTT client initialization failed.
    ///
    /// Usually means an invalid broker address or unreadable credential
    /// files. Caught during bootstrap; the agent then runs without delivery.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// MQTT client failed to queue a packet.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// MQTT connection to the broker failed or was lost.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] validator::ValidationErrors),

    /// Payload could not be serialized to JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O failed, typically while materializing credentials.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Publish attempted while the broker link is down.
    ///
    /// Callers use this to fall back to the spool without waiting on the
    /// client queue.
    #[error("Channel is not connected")]
    NotConnected,
}

// rumqttc's ConnectionError is large; keep it boxed inside the enum.
impl From<rumqttc::ConnectionError> for ChannelError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        ChannelError::ClientConnection(Box::new(err))
    }
}
