use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What `finish_transfer` does when the coordinator sent no checksum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Accept the package unverified.
    #[default]
    SkipIfAbsent,
    /// Fail closed: abort the transfer with `verification_failed`.
    Require,
}

/// Limits and policies applied by the [`TransferHandler`](crate::TransferHandler).
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub max_transfer_size: u64,
    pub max_chunk_size: usize,
    /// Upper bound on checksum verification at finish.
    pub verify_timeout: Duration,
    /// In-progress transfers without activity for this long are aborted.
    /// Zero disables idle expiry.
    pub idle_timeout: Duration,
    pub checksum_policy: ChecksumPolicy,
    /// Verified packages are written here when set.
    pub package_dir: Option<PathBuf>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_transfer_size: 4 * 1024 * 1024 * 1024,
            max_chunk_size: 48 * 1024 * 1024,
            verify_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(600),
            checksum_policy: ChecksumPolicy::default(),
            package_dir: None,
        }
    }
}
