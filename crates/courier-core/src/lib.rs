//! courier-core
//!
//! Core building blocks for the Courier dispatch runtime: admission-controlled,
//! retry-aware delivery of jobs to an external collaborator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, failure, events, errors）
//! - **admission**: 流量制御（token bucket limiter, circuit breaker）
//! - **queue**: ディスパッチキュー（FIFO + dedup + retry scheduling）
//! - **ports**: 抽象化レイヤー（Transport, AckSink, SessionInvalidator, Clock, DurableQueue）
//! - **app**: アプリケーションロジック（builder, dispatcher loop, status）
//! - **impls**: 実装（in-memory / dev 用）
//!
//! # Guarantees
//! - At-most-one-in-flight job per dispatcher instance (single drain loop).
//! - Idempotent submission by job id.
//! - Per-category throughput ceiling via lazy-refill token buckets.
//! - Fault isolation via a Closed/Open/HalfOpen circuit breaker.
//! - Bounded, jittered exponential backoff; terminal outcomes reported
//!   exactly once through the acknowledgement event sink.

pub mod admission;
pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
