//! [`Vcs`] backed by configured shell commands.
//!
//! The commands get `WARDEN_BRANCH`, `WARDEN_REASON` and
//! `WARDEN_UNSYNCED_POLICY` in their environment. Rescue-before-reset is the
//! reset command's job.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::ports::{UnsyncedPolicy, Vcs, VcsError};

#[derive(Debug, Clone, Default)]
pub struct CommandVcs {
    reset_command: Option<String>,
    deps_command: Option<String>,
}

impl CommandVcs {
    pub fn new(reset_command: Option<String>, deps_command: Option<String>) -> Self {
        Self {
            reset_command,
            deps_command,
        }
    }

    async fn run(&self, script: Option<&str>, env: &[(&str, &str)]) -> Result<String, VcsError> {
        let script = script
            .filter(|s| !s.trim().is_empty())
            .ok_or(VcsError::NotConfigured)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| VcsError::Failed(format!("failed to run `{script}`: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            info!(script, "fallback command succeeded");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            Err(VcsError::Failed(format!("`{script}` exited with {}: {detail}", output.status)))
        }
    }
}

#[async_trait]
impl Vcs for CommandVcs {
    async fn checkout_and_reset(
        &self,
        branch: &str,
        reason: &str,
        policy: UnsyncedPolicy,
    ) -> Result<String, VcsError> {
        self.run(
            self.reset_command.as_deref(),
            &[
                ("WARDEN_BRANCH", branch),
                ("WARDEN_REASON", reason),
                ("WARDEN_UNSYNCED_POLICY", policy.as_str()),
            ],
        )
        .await
    }

    async fn sync_runtime_dependencies(&self, reason: &str) -> Result<String, VcsError> {
        self.run(self.deps_command.as_deref(), &[("WARDEN_REASON", reason)])
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_command_is_not_configured() {
        let vcs = CommandVcs::default();
        assert!(matches!(
            vcs.sync_runtime_dependencies("crash_storm").await,
            Err(VcsError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn reset_command_sees_branch_and_policy() {
        let vcs = CommandVcs::new(
            Some("echo \"$WARDEN_BRANCH $WARDEN_UNSYNCED_POLICY\"".to_string()),
            None,
        );
        let msg = vcs
            .checkout_and_reset("warden-stable", "crash_storm", UnsyncedPolicy::RescueAndReset)
            .await
            .unwrap();
        assert_eq!(msg, "warden-stable rescue_and_reset");
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let vcs = CommandVcs::new(None, Some("echo nope >&2; exit 3".to_string()));
        let err = vcs.sync_runtime_dependencies("x").await.unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }
}
