//! Record construction and enrichment.
//!
//! The `Enricher` turns raw payloads into complete `Record`s: it stamps a
//! fresh UUID and UTC timestamp exactly once, attaches the application id
//! and device identity, samples system metrics, and looks up the public IP
//! best-effort. Inputs are consumed; a record is never mutated after it is
//! built.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{identity::Identity, metrics::SystemMetrics};

/// A fully enriched telemetry record, serialized as one JSON object.
///
/// Field names on the wire follow the backend's schema, hence the renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub application: String,

    #[serde(rename = "publicIP", default)]
    pub public_ip: Option<String>,

    #[serde(rename = "systemMetrics")]
    pub system_metrics: SystemMetrics,

    #[serde(rename = "macAddressHash", default)]
    pub mac_address_hash: Option<String>,

    #[serde(rename = "commitHash", default)]
    pub commit_hash: Option<String>,

    /// Present only on event records. Its presence is what routes a
    /// replayed record to the event channel.
    #[serde(rename = "stackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Value>,

    /// Type-specific payload fields, flattened into the record object.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// Event records carry a stack trace; everything else is treated as a
    /// metric report.
    pub fn is_event(&self) -> bool {
        self.stack_trace.is_some()
    }
}

/// Best-effort public IP lookup, injectable for tests.
#[async_trait::async_trait]
pub trait IpSource: Send + Sync {
    /// Returns the device's public address, or `None` when the lookup
    /// fails for any reason.
    async fn public_ip(&self) -> Option<String>;
}

/// Looks up the public address via an external echo service.
pub struct HttpIpSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIpSource {
    pub fn new() -> Self {
        Self::with_endpoint("https://api.ipify.org")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for HttpIpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IpSource for HttpIpSource {
    async fn public_ip(&self) -> Option<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .ok()?;

        let body = response.text().await.ok()?;
        let trimmed = body.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Stamps identity, metrics, and addressing fields onto raw payloads.
pub struct Enricher {
    application: String,
    identity: Identity,
    ip_source: Box<dyn IpSource>,
}

impl Enricher {
    pub fn new(
        application: impl Into<String>,
        identity: Identity,
        ip_source: Box<dyn IpSource>,
    ) -> Self {
        Self {
            application: application.into(),
            identity,
            ip_source,
        }
    }

    /// Builds an event record from a stack trace and extra payload fields.
    pub async fn event(&self, stack_trace: Value, payload: Map<String, Value>) -> Record {
        self.build(Some(stack_trace), payload).await
    }

    /// Builds a metric record.
    pub async fn metric(&self, payload: Map<String, Value>) -> Record {
        self.build(None, payload).await
    }

    async fn build(&self, stack_trace: Option<Value>, payload: Map<String, Value>) -> Record {
        Record {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            application: self.application.clone(),
            public_ip: self.ip_source.public_ip().await,
            system_metrics: SystemMetrics::sample().await,
            mac_address_hash: self.identity.mac_hash.clone(),
            commit_hash: self.identity.commit_hash.clone(),
            stack_trace,
            payload,
        }
    }
}
