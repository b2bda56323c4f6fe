//! warden-core
//!
//! Task supervisor: a priority queue of tasks dispatched to a fixed pool of
//! workers, with heartbeat tracking, soft/hard timeouts, crash-storm
//! fallback and a crash-safe queue snapshot.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task, running entry, events, state, budget）
//! - **ports**: 外部協力者への抽象化（Clock, Notifier, Vcs, StateStore, EventSink, AgentExecutor）
//! - **queue**: pending キューと snapshot
//! - **worker**: worker pool と起動戦略（tokio task / OS process）
//! - **supervisor**: poll loop 本体（health, timeout, scheduling, status）
//! - **impls**: ports の実装（ファイル, コマンド, テスト用）
//! - **config**: TOML 設定

pub mod config;
pub mod domain;
pub mod error;
pub mod fs;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use error::WardenError;
pub use supervisor::{BuildError, Supervisor, SupervisorBuilder};
