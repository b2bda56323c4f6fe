//! Auto-scheduled work: owner-requested reviews and evolution cycles.

use serde_json::json;
use tracing::{debug, info, warn};

use super::Supervisor;
use crate::domain::{BudgetTracker, SupervisorEvent, Task, TaskId, TaskKind};

impl Supervisor {
    /// Queue a deep review for the owner. Without `force`, only one review
    /// may be pending or running at a time.
    pub async fn queue_review(&mut self, reason: &str, force: bool) -> Option<TaskId> {
        let Some(owner) = self.load_state().and_then(|st| st.owner()) else {
            debug!("review not queued, no owner");
            return None;
        };
        if !force && self.has_type(&TaskKind::Review) {
            debug!(reason, "review already queued");
            return None;
        }

        let id = self.ids.generate_task_id();
        let task = Task::new(
            id.clone(),
            TaskKind::Review,
            owner,
            format!("DEEP REVIEW\n\nReason: {reason}"),
        )
        .with_extra("review_reason", json!(reason));
        self.queue.enqueue(task, false, self.clock.now());
        info!(task_id = %id, reason, force, "review queued");
        self.persist_quiet("review_enqueued");
        self.notify_owner(&format!("Review queued ({id}): {reason}")).await;
        Some(id)
    }

    /// When everything is idle and evolution mode is on, queue the next
    /// evolution cycle. Switches evolution off once the budget is spent.
    pub async fn enqueue_evolution_if_needed(&mut self) -> Option<TaskId> {
        if !self.queue.is_empty() || !self.running.is_empty() {
            return None;
        }
        let mut state = self.load_state()?;
        if !state.evolution_mode_enabled {
            return None;
        }
        let owner = state.owner()?;

        let limit = self.config.total_budget_limit;
        let budget_pct = BudgetTracker::budget_pct(&state, limit);
        if budget_pct >= 100.0 {
            state.evolution_mode_enabled = false;
            self.save_state(&state);
            warn!(budget_pct, limit, "budget exhausted, evolution mode disabled");
            self.emit(SupervisorEvent::EvolutionDisabledBudget { budget_pct });
            self.notify_owner(&format!(
                "Budget exhausted ({budget_pct:.1}% of ${limit:.2}). Evolution mode disabled."
            ))
            .await;
            return None;
        }

        let now = self.clock.now();
        state.evolution_cycle += 1;
        state.last_evolution_task_at = Some(now);
        let cycle = state.evolution_cycle;
        self.save_state(&state);

        let id = self.ids.generate_task_id();
        let task = Task::new(
            id.clone(),
            TaskKind::Evolution,
            owner,
            format!("EVOLUTION CYCLE #{cycle}"),
        )
        .with_extra("evolution_cycle", json!(cycle));
        self.queue.enqueue(task, false, now);
        info!(task_id = %id, cycle, "evolution cycle queued");
        self.persist_quiet("evolution_enqueued");
        self.notify_owner(&format!("Evolution cycle #{cycle} queued ({id}).")).await;
        Some(id)
    }
}
