//! Agent identity and delivery settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Settings that identify this device to the device API and control
/// where failed records are spooled.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    /// API key presented to the device API as a JWT credential.
    #[validate(length(min = 1, message = "API key must not be empty"))]
    pub api_key: String,

    /// Application identifier attached to every record.
    #[validate(length(min = 1, message = "Application ID must not be empty"))]
    pub app_id: String,

    /// Base URL of the device API.
    #[validate(url(message = "Base URL must be a valid URL"))]
    pub base_url: String,

    /// Directory where the credential bundle is materialized.
    pub credential_dir: PathBuf,

    /// Path of the local spool file holding records that failed to send.
    pub spool_path: PathBuf,

    /// Spool records while the channel is down instead of dropping them.
    ///
    /// Off by default: a channel that never came up would otherwise grow
    /// the spool without bound, since replay only happens on live sends.
    pub spool_when_down: bool,

    /// Interval (in seconds) between periodic metric reports.
    #[validate(range(min = 1, message = "Report interval must be at least 1 second"))]
    pub report_interval: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_id: String::new(),
            base_url: String::new(),
            credential_dir: PathBuf::from("tmp"),
            spool_path: PathBuf::from("tmp/local.txt"),
            spool_when_down: false,
            report_interval: 60,
        }
    }
}
