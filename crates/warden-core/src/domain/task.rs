//! Task model: the unit of work routed to a worker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of task. Drives the default priority and whether the owner is told
/// when it starts.
///
/// Serialized as a plain lowercase string (`"task"`, `"review"`, ...) so the
/// wire shape stays open to kinds this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Task,
    Review,
    Evolution,
    Other(String),
}

impl TaskKind {
    /// Case-insensitive, whitespace-tolerant parse. Never fails.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "task" => TaskKind::Task,
            "review" => TaskKind::Review,
            "evolution" => TaskKind::Evolution,
            _ => TaskKind::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Task => "task",
            TaskKind::Review => "review",
            TaskKind::Evolution => "evolution",
            TaskKind::Other(s) => s,
        }
    }

    /// `task`/`review` -> 0, `evolution` -> 1, anything else -> 2.
    pub fn default_priority(&self) -> i32 {
        match self {
            TaskKind::Task | TaskKind::Review => 0,
            TaskKind::Evolution => 1,
            TaskKind::Other(_) => 2,
        }
    }

    /// Kinds the owner wants to hear about when a worker picks them up.
    pub fn announces_start(&self) -> bool {
        matches!(self, TaskKind::Review | TaskKind::Evolution)
    }
}

/// A missing `type` is an unknown kind, not a plain task.
impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Other(String::new())
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TaskKind::parse(&raw))
    }
}

/// A unit of work.
///
/// Required core: `id`, `type`, `chat_id`, `text`. Everything task-kind
/// specific (review reason, evolution cycle, timeout-retry stamps, ...) goes
/// into `extra`, which is flattened on the wire.
///
/// `priority` and `attempt` are optional on input and always filled in once
/// the task went through [`TaskQueue::enqueue`](crate::queue::TaskQueue::enqueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    #[serde(rename = "type", default)]
    pub kind: TaskKind,

    pub chat_id: i64,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    #[serde(default)]
    pub queue_seq: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        kind: TaskKind,
        chat_id: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            chat_id,
            text: text.into(),
            priority: None,
            attempt: None,
            queue_seq: 0,
            queued_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or_else(|| self.kind.default_priority())
    }

    /// Attempt number, starting at 1. A stored 0 is treated as unset.
    pub fn effective_attempt(&self) -> u32 {
        self.attempt.filter(|a| *a > 0).unwrap_or(1)
    }

    /// Total order of the pending queue: `(priority asc, queue_seq asc)`.
    pub fn sort_key(&self) -> (i32, i64) {
        (self.effective_priority(), self.queue_seq)
    }
}
