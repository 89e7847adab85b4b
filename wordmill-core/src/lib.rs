//! # Wordmill Core
//!
//! Streaming aggregation core for the wordmill pipeline: consumes article
//! records from a partitioned append-only log, computes per-author average
//! word counts over sliding event-time windows, and emits finalized windows
//! exactly once to a durable sink.
//!
//! The crate is organized around the stages of that pipeline:
//!
//! - [`types`] — Core data types: [`ArticleEvent`](types::ArticleEvent),
//!   [`SourceRecord`](types::SourceRecord), [`Watermark`](types::Watermark),
//!   [`WindowResult`](types::WindowResult).
//! - [`decode`] — Raw payload → [`ArticleEvent`](types::ArticleEvent) decoding.
//! - [`window`] — Sliding-window assignment and pluggable aggregate functions.
//! - [`time`] — Per-partition watermark tracking with idle-partition handling.
//! - [`state`] — The sharded (window, key) → accumulator store.
//! - [`checkpoint`] — Offset/state/watermark snapshots and their storage.
//! - [`pipeline`] — Partition workers plus the window-closing coordinator.

pub mod checkpoint;
pub mod config;
pub mod decode;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod source;
pub mod state;
pub mod time;
pub mod types;
pub mod window;
