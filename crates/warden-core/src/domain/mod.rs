//! Domain model (tasks, running entries, events, persistent state, budget).

pub mod budget;
pub mod errors;
pub mod events;
pub mod running;
pub mod state;
pub mod task;

pub use budget::{BudgetTracker, Usage};
pub use errors::FailureKind;
pub use events::{EventRecord, SupervisorEvent, WorkerEvent, WorkerEventKind};
pub use running::{RunningEntry, RunningMap};
pub use state::SupervisorState;
pub use task::{Task, TaskId, TaskKind};
