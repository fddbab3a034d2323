//! # datafeed-rs
//!
//! A session-aligned time-series datafeed server for stock market data.
//! It accepts pushed ticks, depth and trade updates from upstream feed
//! adapters, archives them on rolling schedules aligned with exchange
//! trading sessions, and serves historical slices (day OHLC, 1-minute
//! bars, 5-minute bars, in-session minute snapshots) plus current ticks
//! to many concurrent clients over a compact binary request/response
//! protocol.
//!
//! ## Layout
//!
//! - [`calendar`] — trading-session calendar and the split-session
//!   compressed minute axis.
//! - [`types`] — wire/storage row types (`Ohlc`, `MinuteSnap`,
//!   `Dividend`, `Tick`) and the four payload codecs.
//! - [`store`] — the array archive, the KV store, the in-memory minute
//!   cache, and `StoreManager`, which routes reads/writes across them.
//! - [`protocol`] — request framing, replies, and per-connection state.
//! - [`handler`] — maps wire commands onto `StoreManager` operations.
//! - [`scheduler`] — the 1 Hz controller plus the deferred-work queue.
//! - [`server`] — the TCP accept loop and the store-owning actor task.
//! - [`config`] — TOML config loading.
//! - [`providers`] — pluggable dividend/sector feed adapters.
//! - [`dividend`] — dividend/split adjustment math over a day-OHLC slice.
//!
//! ## Quick start
//!
//! ```no_run
//! use datafeed_rs::config::Config;
//! use datafeed_rs::providers::NullProvider;
//! use datafeed_rs::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> datafeed_rs::error::Result<()> {
//!     let config = Config::load("datafeed.toml")?;
//!     Server::new(config).run(Box::new(NullProvider), Box::new(NullProvider)).await
//! }
//! ```

pub mod calendar;
pub mod config;
pub mod constants;
pub mod dividend;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod providers;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

/// Re-export the error type and Result alias.
pub use error::{DatafeedError, Result};
