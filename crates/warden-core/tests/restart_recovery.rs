//! End-to-end: a supervisor dies, a new one picks the queue back up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rstest::rstest;

use warden_core::domain::{Task, TaskId, TaskKind};
use warden_core::impls::{
    MemoryEventSink, MemoryStateStore, RecordingNotifier, ScriptedExecutor, ScriptedVcs,
};
use warden_core::ports::FixedClock;
use warden_core::worker::TokioSpawner;
use warden_core::{Supervisor, SupervisorConfig};

struct Node {
    sup: Supervisor,
    clock: Arc<FixedClock>,
    events: Arc<MemoryEventSink>,
    state: Arc<MemoryStateStore>,
}

fn node(data_dir: &std::path::Path, workers: usize) -> Node {
    let config = SupervisorConfig {
        max_workers: workers,
        soft_timeout_sec: 60,
        hard_timeout_sec: 120,
        worker_join_timeout_ms: 200,
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    };
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let events = Arc::new(MemoryEventSink::new());
    let state = Arc::new(MemoryStateStore::with_owner(7));
    let sup = Supervisor::builder(config)
        .spawner(Arc::new(TokioSpawner::new(Arc::new(ScriptedExecutor))))
        .clock(clock.clone())
        .state_store(state.clone())
        .event_sink(events.clone())
        .notifier(Arc::new(RecordingNotifier::new()))
        .vcs(Arc::new(ScriptedVcs::ok()))
        .build()
        .unwrap();
    Node {
        sup,
        clock,
        events,
        state,
    }
}

fn task(id: &str, kind: &str, text: &str) -> Task {
    Task::new(id, TaskKind::parse(kind), 7, text)
}

#[tokio::test]
async fn pending_work_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut first = node(dir.path(), 1);
        first.sup.start().await;
        first.sup.enqueue(task("a", "task", "hang"), false).unwrap();
        first.sup.enqueue(task("b", "evolution", ""), false).unwrap();
        first.sup.enqueue(task("c", "task", ""), false).unwrap();
        first.sup.tick().await;

        assert!(first.sup.running().contains_key(&TaskId::new("a")));
        let snap = first.sup.snapshots().read().unwrap().unwrap();
        assert_eq!(snap.pending_count, 2);
        // process "dies" here without a clean shutdown
    }

    let mut second = node(dir.path(), 1);
    second.clock.advance_secs(300);
    let restored = second.sup.start().await;

    assert_eq!(restored, 2);
    let ids: Vec<_> = second.sup.pending().iter().map(|t| t.id.to_string()).collect();
    assert_eq!(ids, vec!["c", "b"]);
    assert_eq!(second.events.types(), vec!["queue_restored_from_snapshot"]);
}

#[tokio::test]
async fn stale_snapshot_is_ignored_after_long_outage() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut first = node(dir.path(), 1);
        first.sup.enqueue(task("a", "task", ""), false).unwrap();
        first.sup.persist("enqueue").unwrap();
    }

    let mut second = node(dir.path(), 1);
    second.clock.advance_secs(901);
    assert_eq!(second.sup.start().await, 0);
    assert!(second.sup.pending().is_empty());
}

#[tokio::test]
async fn clean_shutdown_keeps_in_flight_task_for_next_run() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut first = node(dir.path(), 1);
        first.sup.start().await;
        first.sup.enqueue(task("long", "task", "hang"), false).unwrap();
        first.sup.tick().await;
        first.sup.shutdown_workers().await;
    }

    let mut second = node(dir.path(), 1);
    assert_eq!(second.sup.start().await, 1);
    second.sup.tick().await;
    assert!(second.sup.running().contains_key(&TaskId::new("long")));
}

#[rstest]
#[case::evolution_after_task(&[("a", "evolution"), ("b", "task")], &["b", "a"])]
#[case::unknown_kind_last(&[("x", "scrape"), ("e", "evolution"), ("r", "review")], &["r", "e", "x"])]
#[tokio::test]
async fn assignment_order_follows_priority(#[case] tasks: &[(&str, &str)], #[case] expected: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    let mut n = node(dir.path(), 1);
    n.sup.start().await;
    for (id, kind) in tasks {
        n.sup.enqueue(task(id, kind, ""), false).unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..200 {
        n.sup.tick().await;
        for id in n.sup.running().keys() {
            if !order.contains(&id.to_string()) {
                order.push(id.to_string());
            }
        }
        if order.len() == expected.len() && n.sup.running().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(order, expected);
    assert_eq!(n.state.current().spent_calls, 0);
}
