//! SupervisorBuilder - Supervisor の構築とワイヤリング
//!
//! Only the worker spawner is mandatory. Every other port falls back to the
//! file/log implementation derived from the config.

use std::sync::Arc;

use thiserror::Error;

use super::Supervisor;
use super::health::CrashWindow;
use crate::config::SupervisorConfig;
use crate::impls::{CommandVcs, JsonStateStore, JsonlEventSink, LogNotifier};
use crate::ports::{
    Clock, EventSink, IdGenerator, Notifier, StateStore, SystemClock, UlidGenerator, Vcs,
};
use crate::queue::{SnapshotStore, TaskQueue};
use crate::worker::{WorkerPool, WorkerSpawner};

/// BuildError は Supervisor 構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no worker spawner configured")]
    MissingSpawner,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// # 使用例
/// ```ignore
/// let supervisor = SupervisorBuilder::new(config)
///     .spawner(Arc::new(ProcessSpawner::new(cmd)))
///     .notifier(Arc::new(LogNotifier))
///     .build()?;
/// ```
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    state: Option<Arc<dyn StateStore>>,
    events: Option<Arc<dyn EventSink>>,
    notifier: Option<Arc<dyn Notifier>>,
    vcs: Option<Arc<dyn Vcs>>,
}

impl SupervisorBuilder {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            spawner: None,
            clock: None,
            ids: None,
            state: None,
            events: None,
            notifier: None,
            vcs: None,
        }
    }

    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn vcs(mut self, vcs: Arc<dyn Vcs>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Fail-fast: a missing spawner or a config that can never work is
    /// rejected here rather than on the first tick.
    pub fn build(self) -> Result<Supervisor, BuildError> {
        let config = self.config;
        if config.max_workers == 0 {
            return Err(BuildError::InvalidConfig("max_workers must be at least 1".into()));
        }
        if config.hard_timeout_sec < config.soft_timeout_sec {
            return Err(BuildError::InvalidConfig(format!(
                "hard_timeout_sec ({}) is below soft_timeout_sec ({})",
                config.hard_timeout_sec, config.soft_timeout_sec
            )));
        }
        if config.crash_storm_threshold == 0 {
            return Err(BuildError::InvalidConfig("crash_storm_threshold must be at least 1".into()));
        }
        let spawner = self.spawner.ok_or(BuildError::MissingSpawner)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let state = self
            .state
            .unwrap_or_else(|| Arc::new(JsonStateStore::new(config.state_path())));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(JsonlEventSink::new(config.events_path())));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let vcs = self.vcs.unwrap_or_else(|| {
            Arc::new(CommandVcs::new(
                config.fallback.reset_command.clone(),
                config.fallback.deps_command.clone(),
            ))
        });

        Ok(Supervisor {
            queue: TaskQueue::new(),
            running: Default::default(),
            pool: WorkerPool::new(spawner, config.join_timeout()),
            snapshots: SnapshotStore::new(config.snapshot_path(), config.heartbeat_stale_sec),
            crashes: CrashWindow::new(config.crash_window_sec, config.crash_storm_threshold),
            clock,
            ids,
            state,
            events,
            notifier,
            vcs,
            config,
        })
    }
}
