//! Vcs port - crash storm fallback で使う VCS 操作
//!
//! Only two operations are needed: hard-reset the working tree to a known
//! stable branch, and re-sync runtime dependencies afterwards. How uncommitted
//! work is rescued before the reset belongs to the implementation.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// What to do with uncommitted changes before a hard reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsyncedPolicy {
    /// Save the changes somewhere recoverable, then reset.
    RescueAndReset,
}

impl UnsyncedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsyncedPolicy::RescueAndReset => "rescue_and_reset",
        }
    }
}

impl fmt::Display for UnsyncedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("vcs fallback is not configured")]
    NotConfigured,

    #[error("{0}")]
    Failed(String),
}

/// Both operations return a human readable message on success.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn checkout_and_reset(
        &self,
        branch: &str,
        reason: &str,
        policy: UnsyncedPolicy,
    ) -> Result<String, VcsError>;

    async fn sync_runtime_dependencies(&self, reason: &str) -> Result<String, VcsError>;
}
