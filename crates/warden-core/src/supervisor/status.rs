//! Human readable status report.

use std::fmt::Write;

use super::Supervisor;

const PENDING_PREVIEW: usize = 10;

impl Supervisor {
    pub fn status_text(&self) -> String {
        let now = self.clock.now();
        let busy = self.pool.busy_count();
        let mut out = String::new();

        let _ = writeln!(out, "workers: {} (busy {busy})", self.pool.len());
        let _ = writeln!(out, "pending: {}", self.queue.len());
        let _ = writeln!(out, "running: {}", self.running.len());

        if !self.queue.is_empty() {
            let preview: Vec<String> = self
                .queue
                .pending()
                .iter()
                .take(PENDING_PREVIEW)
                .map(|t| {
                    format!(
                        "{}:{}:pr{}:a{}",
                        t.id,
                        t.kind,
                        t.effective_priority(),
                        t.effective_attempt()
                    )
                })
                .collect();
            let _ = writeln!(out, "pending_queue: {}", preview.join(", "));
        }

        for (id, entry) in &self.running {
            let _ = writeln!(
                out,
                "  {id}: type={} pr={} attempt={} worker={} runtime={:.0}s hb_lag={:.0}s",
                entry.task.kind,
                entry.task.effective_priority(),
                entry.attempt,
                entry.worker_id,
                entry.runtime_sec(now),
                entry.heartbeat_lag_sec(now),
            );
        }

        if !self.running.is_empty() && busy == 0 {
            let _ = writeln!(out, "queue_warning: running>0 while busy=0");
        }

        if let Some(st) = self.load_state() {
            let _ = writeln!(
                out,
                "budget: spent=${:.4} calls={} tokens_prompt={} tokens_completion={}",
                st.spent_usd, st.spent_calls, st.spent_tokens_prompt, st.spent_tokens_completion
            );
            if self.config.total_budget_limit > 0.0 {
                let _ = writeln!(
                    out,
                    "budget_limit: ${:.2} ({:.1}%)",
                    self.config.total_budget_limit,
                    self.budget_pct()
                );
            }
            let _ = writeln!(
                out,
                "evolution: enabled={} cycle={}",
                st.evolution_mode_enabled, st.evolution_cycle
            );
        }

        let _ = writeln!(
            out,
            "timeouts: soft={}s hard={}s heartbeat_stale={}s max_retries={}",
            self.config.soft_timeout_sec,
            self.config.hard_timeout_sec,
            self.config.heartbeat_stale_sec,
            self.config.max_retries
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::TaskKind;
    use crate::impls::ScriptedVcs;
    use crate::supervisor::test_support::{harness, task};

    #[tokio::test]
    async fn status_lists_queue_and_running() {
        let mut h = harness(2, ScriptedVcs::ok());
        h.sup.spawn_workers().await;
        h.sup.enqueue(task("run", TaskKind::Task, "hang"), false).unwrap();
        h.sup.assign_ready().await;
        h.sup.enqueue(task("wait", TaskKind::Evolution, ""), false).unwrap();

        h.clock.advance_secs(5);
        let text = h.sup.status_text();
        assert!(text.contains("workers: 2 (busy 1)"), "{text}");
        assert!(text.contains("pending_queue: wait:evolution:pr1:a1"), "{text}");
        assert!(text.contains("run: type=task pr=0 attempt=1 worker=0 runtime=5s"), "{text}");
        assert!(!text.contains("queue_warning"));
    }
}
