//! In-memory ports (開発用・テスト用)

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::{EventRecord, SupervisorState};
use crate::error::WardenError;
use crate::ports::{EventSink, NotifyError, Notifier, StateStore, UnsyncedPolicy, Vcs, VcsError};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<SupervisorState>,
}

impl MemoryStateStore {
    pub fn new(state: SupervisorState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Store with an owner and nothing else.
    pub fn with_owner(chat_id: i64) -> Self {
        Self::new(SupervisorState {
            owner_chat_id: Some(chat_id),
            ..Default::default()
        })
    }

    pub fn current(&self) -> SupervisorState {
        lock(&self.state).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<SupervisorState, WardenError> {
        Ok(self.current())
    }

    fn save(&self, state: &SupervisorState) -> Result<(), WardenError> {
        *lock(&self.state) = state.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        lock(&self.records).clone()
    }

    /// `type` tag of every record, in order.
    pub fn types(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|r| serde_json::to_value(&r.event).ok())
            .filter_map(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, record: &EventRecord) -> Result<(), WardenError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

/// Keeps every notification instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(i64, String)> {
        lock(&self.messages).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|(_, t)| t).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        lock(&self.messages).push((chat_id, text.to_string()));
        Ok(())
    }
}

/// VCS double with canned answers; counts calls.
#[derive(Debug)]
pub struct ScriptedVcs {
    reset: Result<String, String>,
    deps: Result<String, String>,
    reset_calls: AtomicUsize,
    deps_calls: AtomicUsize,
    last_branch: Mutex<Option<String>>,
}

impl ScriptedVcs {
    pub fn ok() -> Self {
        Self::new(Ok("reset ok".to_string()), Ok("deps ok".to_string()))
    }

    pub fn failing_reset(error: &str) -> Self {
        Self::new(Err(error.to_string()), Ok("deps ok".to_string()))
    }

    pub fn failing_deps(error: &str) -> Self {
        Self::new(Ok("reset ok".to_string()), Err(error.to_string()))
    }

    fn new(reset: Result<String, String>, deps: Result<String, String>) -> Self {
        Self {
            reset,
            deps,
            reset_calls: AtomicUsize::new(0),
            deps_calls: AtomicUsize::new(0),
            last_branch: Mutex::new(None),
        }
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn deps_calls(&self) -> usize {
        self.deps_calls.load(Ordering::SeqCst)
    }

    pub fn last_branch(&self) -> Option<String> {
        lock(&self.last_branch).clone()
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    async fn checkout_and_reset(
        &self,
        branch: &str,
        _reason: &str,
        _policy: UnsyncedPolicy,
    ) -> Result<String, VcsError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_branch) = Some(branch.to_string());
        self.reset.clone().map_err(VcsError::Failed)
    }

    async fn sync_runtime_dependencies(&self, _reason: &str) -> Result<String, VcsError> {
        self.deps_calls.fetch_add(1, Ordering::SeqCst);
        self.deps.clone().map_err(VcsError::Failed)
    }
}
