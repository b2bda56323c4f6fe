//! Impls - ports の実装
//!
//! - ファイル: [`JsonStateStore`], [`JsonlEventSink`]
//! - 外部コマンド: [`CommandVcs`]
//! - ログのみ: [`LogNotifier`]
//! - テスト・ローカル実行用: `Memory*`, [`RecordingNotifier`], [`ScriptedVcs`], [`ScriptedExecutor`]

pub mod command_vcs;
pub mod json_state;
pub mod jsonl_sink;
pub mod log_notifier;
pub mod memory;
pub mod scripted;

// 主要な型を再エクスポート
pub use self::command_vcs::CommandVcs;
pub use self::json_state::JsonStateStore;
pub use self::jsonl_sink::JsonlEventSink;
pub use self::log_notifier::LogNotifier;
pub use self::memory::{MemoryEventSink, MemoryStateStore, RecordingNotifier, ScriptedVcs};
pub use self::scripted::ScriptedExecutor;
