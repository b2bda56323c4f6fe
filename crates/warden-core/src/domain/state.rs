//! Persistent supervisor state (owner, budget counters, evolution flags).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Document kept by the [`StateStore`](crate::ports::StateStore).
///
/// Fields this crate does not know about are carried through `extra`, so a
/// load/save cycle never drops what other components wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupervisorState {
    #[serde(default)]
    pub owner_chat_id: Option<i64>,

    #[serde(default)]
    pub spent_usd: f64,

    #[serde(default)]
    pub spent_calls: u64,

    #[serde(default)]
    pub spent_tokens_prompt: u64,

    #[serde(default)]
    pub spent_tokens_completion: u64,

    #[serde(default)]
    pub evolution_mode_enabled: bool,

    #[serde(default)]
    pub evolution_cycle: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evolution_task_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SupervisorState {
    /// Owner chat, if one is registered. `0` means "nobody".
    pub fn owner(&self) -> Option<i64> {
        self.owner_chat_id.filter(|id| *id != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = serde_json::json!({
            "owner_chat_id": 42,
            "spent_usd": 1.5,
            "session_id": "abc",
        });
        let st: SupervisorState = serde_json::from_value(raw).unwrap();
        assert_eq!(st.owner(), Some(42));
        assert_eq!(st.extra["session_id"], "abc");

        let back = serde_json::to_value(&st).unwrap();
        assert_eq!(back["session_id"], "abc");
    }

    #[test]
    fn zero_owner_is_no_owner() {
        let st = SupervisorState {
            owner_chat_id: Some(0),
            ..Default::default()
        };
        assert_eq!(st.owner(), None);
    }
}
