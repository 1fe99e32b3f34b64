//! Device API provisioning: broker discovery and credential retrieval.
//!
//! The `Provisioner` performs the two HTTP calls of channel bootstrap:
//! fetching the broker/topic assignment for this device, and downloading the
//! certificate bundle that authenticates it. Both calls authenticate with the
//! device API key as a JWT authorization header.
//!
//! Redirects are never followed automatically. The certificate endpoint may
//! answer with a redirect to a signed download URL; that redirect is followed
//! once, explicitly, without the authorization header, so the API key is
//! never forwarded to a third-party host.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::{header, redirect::Policy, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    config::{BrokerConfig, TopicMap},
    error::ChannelError,
};

const CONFIG_ENDPOINT: &str = "private/devices/config/";
const CERTIFICATES_ENDPOINT: &str = "private/devices/certificates/";

const CA_FILE: &str = "ck_ca.pem";
const CERT_FILE: &str = "ck_cert.pem";
const KEY_FILE: &str = "ck_private_key.pem";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Filesystem locations of the materialized credential bundle.
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Wire shape of the device config endpoint response.
#[derive(Debug, Deserialize)]
struct DeviceConfigResponse {
    brokers: Vec<String>,
    prof_topic: String,
    event_topic: String,
    log_topic: String,
}

/// Client for the device API.
pub struct Provisioner {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Provisioner {
    /// Creates a provisioner for the given device API.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("JWT {}", self.api_key)
    }

    /// Fetches the broker addresses and topic assignment for this device.
    ///
    /// The assignment is immutable once fetched; re-provisioning requires a
    /// process restart.
    ///
    /// # Errors
    ///
    /// Fails on HTTP errors, non-success status codes, and responses that
    /// name no brokers.
    pub async fn fetch_broker_config(&self) -> Result<BrokerConfig, ChannelError> {
        let endpoint = self.endpoint(CONFIG_ENDPOINT);
        let response = self
            .client
            .get(&endpoint)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::ApiStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body: DeviceConfigResponse = response.json().await?;
        if body.brokers.is_empty() {
            return Err(ChannelError::Provisioning(
                "device config contains no broker addresses".into(),
            ));
        }

        info!("Device config fetched: {} broker(s)", body.brokers.len());
        Ok(BrokerConfig {
            brokers: body.brokers,
            topics: TopicMap {
                monitoring: body.prof_topic,
                event: body.event_topic,
                log: body.log_topic,
            },
        })
    }

    /// Downloads the certificate bundle and extracts it into `dir`.
    ///
    /// Every archive entry is written under its entry file name. The
    /// directory is created if needed; extraction is idempotent.
    ///
    /// # Errors
    ///
    /// Fails on HTTP errors, malformed archives, and bundles missing any of
    /// the expected credential files.
    pub async fn fetch_credentials(&self, dir: &Path) -> Result<CredentialPaths, ChannelError> {
        let endpoint = self.endpoint(CERTIFICATES_ENDPOINT);
        let mut response = self
            .client
            .get(&endpoint)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        // Signed download URLs reject the JWT header, so the redirect is
        // re-issued without credentials.
        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    ChannelError::Provisioning(
                        "certificate redirect without a Location header".into(),
                    )
                })?
                .to_string();

            debug!("Following certificate redirect without credentials");
            response = self.client.get(&location).send().await?;
        }

        if !response.status().is_success() {
            return Err(ChannelError::ApiStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let payload = response.bytes().await?;
        extract_bundle(&payload, dir)?;

        let paths = CredentialPaths {
            ca: dir.join(CA_FILE),
            cert: dir.join(CERT_FILE),
            key: dir.join(KEY_FILE),
        };
        for (name, path) in [
            (CA_FILE, &paths.ca),
            (CERT_FILE, &paths.cert),
            (KEY_FILE, &paths.key),
        ] {
            if !path.is_file() {
                return Err(ChannelError::MissingCredential(name.to_string()));
            }
        }

        info!("Credential bundle extracted to {}", dir.display());
        Ok(paths)
    }
}

/// Unpacks every archive entry into `dir` under its entry file name.
///
/// Entries with unsafe or empty paths are skipped rather than failing the
/// whole bundle.
fn extract_bundle(payload: &[u8], dir: &Path) -> Result<(), ChannelError> {
    std::fs::create_dir_all(dir)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(payload))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!("Skipping archive entry with unsafe path: {}", entry.name());
                continue;
            }
        };
        let Some(file_name) = entry_path.file_name().map(ToOwned::to_owned) else {
            continue;
        };

        let target = dir.join(file_name);
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!("Extracted credential file: {}", target.display());
    }

    Ok(())
}
