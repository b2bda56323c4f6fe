//! Ports - 抽象化レイヤー
//!
//! 外部の協力者 (agent, messaging gateway, VCS, state file, event log) への
//! 細いインターフェース。Supervisor はこれらの trait だけを知っている。

pub mod clock;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod notifier;
pub mod state_store;
pub mod vcs;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::executor::{AgentExecutor, EventEmitter};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{NotifyError, Notifier};
pub use self::state_store::StateStore;
pub use self::vcs::{UnsyncedPolicy, Vcs, VcsError};
