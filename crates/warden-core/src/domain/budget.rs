//! Budget accounting for paid agent work.
//!
//! Independent of scheduling: the only scheduling decision that looks at the
//! budget is evolution auto-scheduling, and it does so through [`BudgetTracker::budget_pct`].

use serde_json::Value;

use super::state::SupervisorState;

/// Usage reported by one unit of paid work.
///
/// Parsed leniently: missing or malformed fields count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn from_value(value: &Value) -> Self {
        Self {
            cost: coerce_f64(value.get("cost")),
            prompt_tokens: coerce_u64(value.get("prompt_tokens")),
            completion_tokens: coerce_u64(value.get("completion_tokens")),
        }
    }
}

fn coerce_f64(v: Option<&Value>) -> f64 {
    let parsed = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

fn coerce_u64(v: Option<&Value>) -> u64 {
    match v {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

pub struct BudgetTracker;

impl BudgetTracker {
    /// Add one usage report to the running totals. Never fails.
    pub fn record_usage(state: &mut SupervisorState, usage: &Value) {
        let u = Usage::from_value(usage);
        state.spent_usd += u.cost;
        state.spent_calls += 1;
        state.spent_tokens_prompt = state.spent_tokens_prompt.saturating_add(u.prompt_tokens);
        state.spent_tokens_completion = state
            .spent_tokens_completion
            .saturating_add(u.completion_tokens);
    }

    /// `spent / limit * 100`; a limit `<= 0` means "no limit" and yields 0.
    pub fn budget_pct(state: &SupervisorState, limit: f64) -> f64 {
        if limit <= 0.0 {
            return 0.0;
        }
        state.spent_usd / limit * 100.0
    }
}
