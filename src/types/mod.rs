//! Wire and storage row types for the datafeed server.
//!
//! ## Organization
//!
//! - [`rows`] — fixed-width archive rows (`Ohlc`, `MinuteSnap`, `Dividend`)
//!   and the free-form `Tick` map.
//! - [`codec`] — the four payload encodings carried in protocol bulk bodies:
//!   `json`, `npy`, `zip`, `plain`.

pub mod codec;
pub mod rows;

pub use rows::{tick_timestamp, Dividend, MinuteSnap, Ohlc, Row, Tick, TickValue};
