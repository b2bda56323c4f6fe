//! Supervisor configuration (TOML + a few env overrides).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::WardenError;
use crate::worker::ProcessCommand;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_workers: usize,
    pub soft_timeout_sec: u64,
    pub hard_timeout_sec: u64,
    pub heartbeat_stale_sec: u64,
    /// A hard-timed-out task is retried while `attempt <= max_retries`.
    pub max_retries: u32,
    /// USD. `<= 0` means no limit.
    pub total_budget_limit: f64,
    pub snapshot_max_age_sec: u64,
    pub crash_window_sec: u64,
    pub crash_storm_threshold: usize,
    pub worker_join_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub event_drain_limit: usize,
    pub branch_stable: String,
    pub data_dir: PathBuf,
    pub worker: WorkerConfig,
    pub fallback: FallbackConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            soft_timeout_sec: 600,
            hard_timeout_sec: 1800,
            heartbeat_stale_sec: 120,
            max_retries: 1,
            total_budget_limit: 0.0,
            snapshot_max_age_sec: 900,
            crash_window_sec: 60,
            crash_storm_threshold: 3,
            worker_join_timeout_ms: 5000,
            tick_interval_ms: 500,
            event_drain_limit: 256,
            branch_stable: "warden-stable".to_string(),
            data_dir: PathBuf::from("./warden-data"),
            worker: WorkerConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

/// `[worker]`: command line of one worker process. Empty `command` means
/// "no process workers configured". `current_dir` defaults to ours.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn process_command(&self) -> Option<ProcessCommand> {
        if self.command.trim().is_empty() {
            return None;
        }
        Some(ProcessCommand {
            program: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            current_dir: self.current_dir.clone(),
        })
    }
}

/// `[fallback]`: shell commands run on crash storm.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub reset_command: Option<String>,
    pub deps_command: Option<String>,
}

impl SupervisorConfig {
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        let raw = fs::read_to_string(path).map_err(|e| WardenError::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, WardenError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `WARDEN_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparsable values are ignored with a
    /// warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = raw, "ignoring unparsable config override");
                    None
                }
            }
        }

        if let Some(v) = parse("WARDEN_MAX_WORKERS", lookup("WARDEN_MAX_WORKERS")) {
            self.max_workers = v;
        }
        if let Some(v) = parse("WARDEN_SOFT_TIMEOUT_SEC", lookup("WARDEN_SOFT_TIMEOUT_SEC")) {
            self.soft_timeout_sec = v;
        }
        if let Some(v) = parse("WARDEN_HARD_TIMEOUT_SEC", lookup("WARDEN_HARD_TIMEOUT_SEC")) {
            self.hard_timeout_sec = v;
        }
        if let Some(v) = parse("WARDEN_BUDGET_LIMIT_USD", lookup("WARDEN_BUDGET_LIMIT_USD")) {
            self.total_budget_limit = v;
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state").join("queue_snapshot.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state").join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("supervisor.jsonl")
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(SupervisorConfig::from_toml_str("").unwrap(), SupervisorConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = SupervisorConfig::from_toml_str(
            r#"
            max_workers = 2
            data_dir = "/var/lib/warden"

            [worker]
            command = "python3"
            args = ["-m", "agent.worker"]
            current_dir = "/srv/agent"

            [fallback]
            reset_command = "git checkout -f $WARDEN_BRANCH"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.hard_timeout_sec, 1800);
        assert_eq!(cfg.snapshot_path(), PathBuf::from("/var/lib/warden/state/queue_snapshot.json"));
        let cmd = cfg.worker.process_command().unwrap();
        assert_eq!(cmd.args, vec!["-m", "agent.worker"]);
        assert_eq!(cmd.current_dir, Some(PathBuf::from("/srv/agent")));
        assert!(cfg.fallback.deps_command.is_none());
    }

    #[test]
    fn bad_type_is_config_error() {
        assert!(matches!(
            SupervisorConfig::from_toml_str("max_workers = \"many\""),
            Err(WardenError::Config(_))
        ));
    }

    #[rstest]
    #[case::workers("WARDEN_MAX_WORKERS", "8", |c: &SupervisorConfig| c.max_workers == 8)]
    #[case::soft("WARDEN_SOFT_TIMEOUT_SEC", "30", |c: &SupervisorConfig| c.soft_timeout_sec == 30)]
    #[case::hard("WARDEN_HARD_TIMEOUT_SEC", " 90 ", |c: &SupervisorConfig| c.hard_timeout_sec == 90)]
    #[case::budget("WARDEN_BUDGET_LIMIT_USD", "12.5", |c: &SupervisorConfig| c.total_budget_limit == 12.5)]
    #[case::garbage("WARDEN_MAX_WORKERS", "lots", |c: &SupervisorConfig| c.max_workers == 5)]
    fn env_overrides(
        #[case] key: &str,
        #[case] value: &str,
        #[case] check: fn(&SupervisorConfig) -> bool,
    ) {
        let mut cfg = SupervisorConfig::default();
        cfg.apply_overrides(|k| (k == key).then(|| value.to_string()));
        assert!(check(&cfg));
    }

    #[test]
    fn no_worker_command_means_no_process_workers() {
        assert!(SupervisorConfig::default().worker.process_command().is_none());
    }
}
