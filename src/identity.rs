//! Device identity resolution.
//!
//! Every value here is best-effort: a device without a readable MAC address
//! or release file still produces records, just without those fields. No
//! error ever propagates out of this module.

use std::path::{Path, PathBuf};

use tracing::debug;

const RELEASE_FILE: &str = ".petrel/version";

/// Stable device identity fields attached to every record.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// MD5 hash of the primary interface MAC address.
    pub mac_hash: Option<String>,
    /// Deployed release identifier read from the release file.
    pub commit_hash: Option<String>,
    /// Directory the release file was found in.
    pub release_root: Option<PathBuf>,
}

impl Identity {
    /// Resolves the device identity from the local system.
    pub fn resolve() -> Self {
        let mac_hash = hashed_mac();
        let (commit_hash, release_root) = read_release(Path::new("."));

        Self {
            mac_hash,
            commit_hash,
            release_root,
        }
    }
}

/// MD5 digest of the primary interface MAC address.
///
/// The address is formatted as dash-separated uppercase octet pairs before
/// hashing; backends expect exactly this shape.
fn hashed_mac() -> Option<String> {
    let mac = mac_address::get_mac_address().ok().flatten()?;
    Some(hash_mac_bytes(&mac.bytes()))
}

fn hash_mac_bytes(bytes: &[u8]) -> String {
    let formatted = bytes
        .iter()
        .map(|octet| format!("{:02X}", octet))
        .collect::<Vec<_>>()
        .join("-");
    format!("{:x}", md5::compute(formatted))
}

/// Walks up from `start` looking for the release file.
///
/// Returns the trimmed file contents and the directory it was found in, or
/// `(None, None)` when no ancestor carries one.
fn read_release(start: &Path) -> (Option<String>, Option<PathBuf>) {
    let Ok(start) = start.canonicalize() else {
        return (None, None);
    };

    let mut dir = Some(start.as_path());
    while let Some(current) = dir {
        let candidate = current.join(RELEASE_FILE);
        if candidate.is_file() {
            debug!("Release file found at {}", candidate.display());
            let commit = std::fs::read_to_string(&candidate)
                .ok()
                .map(|content| content.trim().to_string())
                .filter(|content| !content.is_empty());
            return (commit, Some(current.to_path_buf()));
        }
        dir = current.parent();
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_hash_mac_bytes_is_stable() {
        let bytes = [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E];
        let first = hash_mac_bytes(&bytes);
        let second = hash_mac_bytes(&bytes);

        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_mac_bytes_depends_on_address() {
        let a = hash_mac_bytes(&[0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
        let b = hash_mac_bytes(&[0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5F]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_read_release_in_ancestor() {
        let dir = TempDir::new().unwrap();
        let release_dir = dir.path().join(".petrel");
        std::fs::create_dir_all(&release_dir).unwrap();
        std::fs::File::create(release_dir.join("version"))
            .unwrap()
            .write_all(b"abc123def\n")
            .unwrap();

        let nested = dir.path().join("app/subdir");
        std::fs::create_dir_all(&nested).unwrap();

        let (commit, root) = read_release(&nested);
        assert_eq!(commit.as_deref(), Some("abc123def"));
        assert_eq!(root.unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_read_release_missing() {
        let dir = TempDir::new().unwrap();
        let (commit, root) = read_release(dir.path());
        assert!(commit.is_none());
        assert!(root.is_none());
    }

    #[test]
    fn test_read_release_empty_file() {
        let dir = TempDir::new().unwrap();
        let release_dir = dir.path().join(".petrel");
        std::fs::create_dir_all(&release_dir).unwrap();
        std::fs::File::create(release_dir.join("version")).unwrap();

        let (commit, root) = read_release(dir.path());
        assert!(commit.is_none());
        // The root is still reported; only the commit content was empty
        assert!(root.is_some());
    }
}
