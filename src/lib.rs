//! petrel — device-side telemetry agent with spool-backed delivery
//!
//! This crate collects error events and periodic system metrics on a device,
//! enriches them with stable device identity, and delivers them over an
//! authenticated MQTT channel (see the `petrel-broker` crate). Records that
//! cannot be sent are spooled to a local JSON-lines file and replayed after
//! the next successful send, so telemetry survives connectivity gaps and
//! process restarts.
//!
//! ## Modules
//!
//! * `config` — Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator`
//!   crate.
//!
//! * `identity` — Best-effort device identity resolution: hashed MAC address
//!   and deployed release identifier.
//!
//! * `metrics` — Point-in-time system metrics sampled from procfs.
//!
//! * `enrich` — Record construction: stamps id, timestamp, identity, public
//!   IP, and metrics onto raw event and metric payloads.
//!
//! * `delivery` — The produce-or-spool core: live send, spool fallback, and
//!   backlog replay after recovery.
//!
//! * `spool` — The append-only JSON-lines spool file.
//!
//! * `lifecycle` — Start/stop task runner and the periodic metric reporter.
//!
//! * `logger` — Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.

pub mod config;
pub mod delivery;
pub mod enrich;
pub mod identity;
pub mod lifecycle;
pub mod logger;
pub mod metrics;
pub mod spool;
