//! Best-effort system metrics sampling.
//!
//! Records carry a point-in-time snapshot of the host so backends can
//! correlate errors with system pressure. Sampling never fails: any
//! unreadable source degrades to the field default.

use serde::{Deserialize, Serialize};

/// Point-in-time system metrics attached to outgoing records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// One-minute load average.
    pub load_average: f64,
    /// Total physical memory in kibibytes.
    pub total_memory: u64,
    /// Memory available for new workloads in kibibytes.
    pub available_memory: u64,
    /// Seconds since boot.
    pub uptime_seconds: f64,
}

impl SystemMetrics {
    /// Samples the local system.
    #[cfg(target_os = "linux")]
    pub async fn sample() -> Self {
        let mut metrics = Self::default();

        if let Ok(content) = tokio::fs::read_to_string("/proc/loadavg").await {
            if let Some(value) = content.split_whitespace().next().and_then(|v| v.parse().ok()) {
                metrics.load_average = value;
            }
        }

        if let Ok(content) = tokio::fs::read_to_string("/proc/meminfo").await {
            for line in content.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    metrics.total_memory = parse_meminfo_kib(rest);
                } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    metrics.available_memory = parse_meminfo_kib(rest);
                }
            }
        }

        if let Ok(content) = tokio::fs::read_to_string("/proc/uptime").await {
            if let Some(value) = content.split_whitespace().next().and_then(|v| v.parse().ok()) {
                metrics.uptime_seconds = value;
            }
        }

        metrics
    }

    /// Samples the local system. Without procfs everything stays at its
    /// default; records are still complete.
    #[cfg(not(target_os = "linux"))]
    pub async fn sample() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "linux")]
fn parse_meminfo_kib(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_meminfo_kib() {
        assert_eq!(parse_meminfo_kib("       16384516 kB"), 16384516);
        assert_eq!(parse_meminfo_kib(" 0 kB"), 0);
        assert_eq!(parse_meminfo_kib("garbage"), 0);
        assert_eq!(parse_meminfo_kib(""), 0);
    }

    #[test]
    fn test_serialized_field_names() {
        let metrics = SystemMetrics {
            load_average: 1.5,
            total_memory: 1024,
            available_memory: 512,
            uptime_seconds: 99.0,
        };

        let value = serde_json::to_value(&metrics).unwrap();
        assert!(value.get("loadAverage").is_some());
        assert!(value.get("totalMemory").is_some());
        assert!(value.get("availableMemory").is_some());
        assert!(value.get("uptimeSeconds").is_some());
    }

    #[tokio::test]
    async fn test_sample_never_fails() {
        let metrics = SystemMetrics::sample().await;
        assert!(metrics.load_average >= 0.0);
        assert!(metrics.uptime_seconds >= 0.0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sample_reads_procfs() {
        let metrics = SystemMetrics::sample().await;
        assert!(metrics.total_memory > 0);
        assert!(metrics.uptime_seconds > 0.0);
    }
}
