use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use warden_core::domain::Task;
use warden_core::impls::{JsonStateStore, ScriptedExecutor};
use warden_core::ports::StateStore;
use warden_core::queue::SnapshotStore;
use warden_core::worker::{ProcessSpawner, TokioSpawner, WorkerSpawner};
use warden_core::{Supervisor, SupervisorConfig};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Task supervisor")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the supervisor until Ctrl-C.
    Run {
        /// Override max_workers.
        #[arg(long)]
        workers: Option<usize>,

        /// JSON lines file of tasks to enqueue at startup.
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Run tasks in-process with the line-scripted executor instead of
        /// spawning worker processes.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the last persisted snapshot and budget state.
    Status,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "info".to_string()
    };
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SupervisorConfig> {
    let mut config = match path {
        Some(p) => SupervisorConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => SupervisorConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn read_tasks(path: &Path) -> anyhow::Result<Vec<Task>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("{}:{}: invalid task", path.display(), i + 1))
        })
        .collect()
}

async fn run(
    mut config: SupervisorConfig,
    workers: Option<usize>,
    tasks: Option<PathBuf>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if let Some(n) = workers {
        config.max_workers = n;
    }

    let spawner: Arc<dyn WorkerSpawner> = if dry_run {
        Arc::new(TokioSpawner::new(Arc::new(ScriptedExecutor)))
    } else {
        let Some(cmd) = config.worker.process_command() else {
            bail!("no [worker] command configured; set one or pass --dry-run");
        };
        Arc::new(ProcessSpawner::new(cmd))
    };

    let mut supervisor = Supervisor::builder(config).spawner(spawner).build()?;
    let restored = supervisor.start().await;
    info!(restored, "supervisor started");

    if let Some(path) = tasks {
        for task in read_tasks(&path)? {
            let id = task.id.clone();
            if let Err(e) = supervisor.enqueue(task, false) {
                warn!(task_id = %id, error = %e, "task not enqueued");
            }
        }
        supervisor.persist("enqueue")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await;
    println!("{}", supervisor.status_text());
    Ok(())
}

fn status(config: &SupervisorConfig) -> anyhow::Result<()> {
    let snapshots = SnapshotStore::new(config.snapshot_path(), config.heartbeat_stale_sec);
    match snapshots.read()? {
        None => println!("no snapshot at {}", snapshots.path().display()),
        Some(snap) => {
            println!("snapshot: {} ({})", snap.ts.to_rfc3339(), snap.reason);
            println!("pending: {}", snap.pending_count);
            for row in &snap.pending {
                println!("  {}:{}:pr{}:a{}", row.id, row.kind, row.priority, row.attempt);
            }
            println!("running: {}", snap.running_count);
            for row in &snap.running {
                println!(
                    "  {}: type={} worker={} attempt={} runtime={:.0}s hb_lag={:.0}s{}",
                    row.id,
                    row.kind,
                    row.worker_id,
                    row.attempt,
                    row.runtime_sec,
                    row.heartbeat_lag_sec,
                    if row.heartbeat_stale { " (stale)" } else { "" }
                );
            }
        }
    }

    let state = JsonStateStore::new(config.state_path()).load()?;
    println!(
        "budget: spent=${:.4} calls={} tokens_prompt={} tokens_completion={}",
        state.spent_usd, state.spent_calls, state.spent_tokens_prompt, state.spent_tokens_completion
    );
    println!(
        "evolution: enabled={} cycle={}",
        state.evolution_mode_enabled, state.evolution_cycle
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run {
            workers,
            tasks,
            dry_run,
        } => run(config, workers, tasks, dry_run).await,
        Command::Status => status(&config),
    }
}
