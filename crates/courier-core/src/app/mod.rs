//! App - アプリケーション層
//!
//! ports と admission を組み合わせてディスパッチループを実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: 構築とワイヤリング（起動時検証つき、fail-fast）
//! - **Dispatcher**: コアループ（head → ack → limiter → breaker → call → classify → retry/report）
//! - **DispatcherHandle**: spawn されたループの graceful shutdown
//! - **DispatchCounts**: 状態別カウント（observability 用）

pub mod builder;
pub mod dispatcher;
pub mod status;

pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::dispatcher::{DispatchConfig, Dispatcher, DispatcherHandle};
pub use self::status::DispatchCounts;
