//! Local spool file for records that could not be delivered.
//!
//! The spool is an append-only JSON-lines file. It is created lazily on
//! first append and truncated (never deleted) after a replay pass, so
//! spooled records survive process restarts. All access is serialized by
//! the delivery core; this type itself takes no locks.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::{debug, warn};

/// Errors from spool file operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Spool IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spool serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only JSON-lines file holding records that failed to send.
#[derive(Debug)]
pub struct Spool {
    path: PathBuf,
}

impl Spool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single JSON line.
    ///
    /// Parent directories are created as needed. The line is written with
    /// one write call so concurrent appenders never interleave bytes.
    pub async fn append(&self, record: &impl serde::Serialize) -> Result<(), SpoolError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!("Record spooled to {}", self.path.display());
        Ok(())
    }

    /// Reads all spooled records oldest-first.
    ///
    /// A missing file yields an empty list. Unparsable lines are skipped
    /// with a warning rather than poisoning the rest of the spool.
    pub async fn read_all(&self) -> Result<Vec<serde_json::Value>, SpoolError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => records.push(value),
                Err(e) => warn!("Skipping malformed spool line: {}", e),
            }
        }

        Ok(records)
    }

    /// Truncates the spool to empty, keeping the file in place.
    pub async fn truncate(&self) -> Result<(), SpoolError> {
        match OpenOptions::new().write(true).open(&self.path).await {
            Ok(file) => {
                file.set_len(0).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;

    fn spool_in(dir: &TempDir) -> Spool {
        Spool::new(dir.path().join("tmp/local.txt"))
    }

    #[tokio::test]
    async fn test_append_then_read_preserves_order() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);

        for i in 0..5 {
            spool.append(&json!({"seq": i})).await.unwrap();
        }

        let records = spool.read_all().await.unwrap();
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record["seq"], json!(i));
        }
    }

    #[tokio::test]
    async fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);
        assert!(spool.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_empties_but_keeps_file() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);

        spool.append(&json!({"k": 1})).await.unwrap();
        spool.truncate().await.unwrap();

        assert!(spool.path().is_file());
        assert!(spool.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);
        assert!(spool.truncate().await.is_ok());
    }

    #[tokio::test]
    async fn test_append_after_truncate() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);

        spool.append(&json!({"old": true})).await.unwrap();
        spool.truncate().await.unwrap();
        spool.append(&json!({"new": true})).await.unwrap();

        let records = spool.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["new"], json!(true));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let spool = spool_in(&dir);

        spool.append(&json!({"ok": 1})).await.unwrap();
        tokio::fs::write(
            spool.path(),
            "{\"ok\":1}\nnot json at all\n{\"ok\":2}\n",
        )
        .await
        .unwrap();

        let records = spool.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(logs_contain("Skipping malformed spool line"));
    }
}
