//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部コラボレータ（プラットフォーム API、
//! durable queue、セッションストアなど）へのインターフェースを定義し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 副作用系のポート（AckSink, SessionInvalidator）の失敗は呼び出し側で
//!   ログして破棄する（ジョブの結果には絶対に伝播させない）
//! - Clock を差し替えることで limiter / breaker を決定的にテストできる

pub mod ack_sink;
pub mod clock;
pub mod durable_queue;
pub mod session;
pub mod transport;

pub use self::ack_sink::AckSink;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::durable_queue::{DurableQueue, QueueMessage, SendReceipt};
pub use self::session::SessionInvalidator;
pub use self::transport::Transport;
