//! Impls - 実装（開発用・テスト用）
//!
//! ports の in-memory 実装を含みます。
//!
//! # 含まれる実装
//! - **MemoryAckSink**: イベントを貯めるだけの ack sink
//! - **NoopSessionInvalidator**: 何もしない session invalidator
//! - **InMemoryDurableQueue** + **DurableQueueTransport**: visibility
//!   timeout / dead-letter 付きの durable queue 変種
//!
//! 本番用実装（SQS、websocket、実ブラウザセッション）は別クレートに
//! 配置する想定です。

pub mod durable;
pub mod memory_ack;
pub mod noop_session;

pub use self::durable::{DurableQueueConfig, DurableQueueTransport, InMemoryDurableQueue};
pub use self::memory_ack::MemoryAckSink;
pub use self::noop_session::NoopSessionInvalidator;
