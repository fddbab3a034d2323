//! Fixed-width row types archived by [`crate::store::array_store`], plus the
//! free-form [`Tick`] map stored opaquely in the KV store.
//!
//! Every row type here is `Copy`, has a stable little-endian byte layout
//! (see [`Row`]), and a `dtype` name preserved across the wire in the `npy`
//! codec header (§3, §4.6 of the design).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single bar: open/high/low/close plus volume and amount for one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Unix seconds, start of the bar.
    pub time: i32,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub volume: f32,
    pub amount: f32,
}

impl Ohlc {
    /// An all-zero row, used to pad fixed-shape arrays.
    pub const ZERO: Ohlc = Ohlc {
        time: 0,
        open: 0.0,
        high: 0.0,
        low: 0.0,
        close: 0.0,
        volume: 0.0,
        amount: 0.0,
    };
}

impl Default for Ohlc {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A point-in-time price/volume/amount record at the one-minute grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinuteSnap {
    pub time: i32,
    pub price: f32,
    pub volume: f32,
    pub amount: f32,
}

impl MinuteSnap {
    pub const ZERO: MinuteSnap = MinuteSnap {
        time: 0,
        price: 0.0,
        volume: 0.0,
        amount: 0.0,
    };
}

impl Default for MinuteSnap {
    fn default() -> Self {
        Self::ZERO
    }
}

/// One dividend/split event for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub time: i32,
    pub split: f32,
    pub purchase: f32,
    pub purchase_price: f32,
    pub dividend: f32,
}

impl Dividend {
    pub const ZERO: Dividend = Dividend {
        time: 0,
        split: 0.0,
        purchase: 0.0,
        purchase_price: 0.0,
        dividend: 0.0,
    };
}

impl Default for Dividend {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A fixed-width row archivable by [`crate::store::array_store`].
///
/// Implementors have a stable little-endian byte layout so the `npy` wire
/// codec and the file-backed array store can read/write them without going
/// through `serde`.
pub trait Row: Copy + Default + PartialEq {
    /// Dtype name preserved in the `npy` header (§4.6); must stay stable
    /// since clients rely on it to validate what they decoded.
    const DTYPE_NAME: &'static str;
    /// Encoded row width in bytes.
    const ROW_BYTES: usize;

    /// Row timestamp, used for zero-row detection and day-boundary scans.
    fn time(&self) -> i32;

    /// Append this row's little-endian bytes to `buf`.
    fn write_le(&self, buf: &mut Vec<u8>);

    /// Decode a row from exactly `Self::ROW_BYTES` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

impl Row for Ohlc {
    const DTYPE_NAME: &'static str = "OHLC";
    const ROW_BYTES: usize = 4 * 7;

    fn time(&self) -> i32 {
        self.time
    }

    fn write_le(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.open.to_le_bytes());
        buf.extend_from_slice(&self.high.to_le_bytes());
        buf.extend_from_slice(&self.low.to_le_bytes());
        buf.extend_from_slice(&self.close.to_le_bytes());
        buf.extend_from_slice(&self.volume.to_le_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
    }

    fn read_le(b: &[u8]) -> Self {
        Ohlc {
            time: i32::from_le_bytes(b[0..4].try_into().unwrap()),
            open: f32::from_le_bytes(b[4..8].try_into().unwrap()),
            high: f32::from_le_bytes(b[8..12].try_into().unwrap()),
            low: f32::from_le_bytes(b[12..16].try_into().unwrap()),
            close: f32::from_le_bytes(b[16..20].try_into().unwrap()),
            volume: f32::from_le_bytes(b[20..24].try_into().unwrap()),
            amount: f32::from_le_bytes(b[24..28].try_into().unwrap()),
        }
    }
}

impl Row for MinuteSnap {
    const DTYPE_NAME: &'static str = "MinuteSnap";
    const ROW_BYTES: usize = 4 * 4;

    fn time(&self) -> i32 {
        self.time
    }

    fn write_le(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.price.to_le_bytes());
        buf.extend_from_slice(&self.volume.to_le_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
    }

    fn read_le(b: &[u8]) -> Self {
        MinuteSnap {
            time: i32::from_le_bytes(b[0..4].try_into().unwrap()),
            price: f32::from_le_bytes(b[4..8].try_into().unwrap()),
            volume: f32::from_le_bytes(b[8..12].try_into().unwrap()),
            amount: f32::from_le_bytes(b[12..16].try_into().unwrap()),
        }
    }
}

impl Row for Dividend {
    const DTYPE_NAME: &'static str = "Dividend";
    const ROW_BYTES: usize = 4 * 5;

    fn time(&self) -> i32 {
        self.time
    }

    fn write_le(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.split.to_le_bytes());
        buf.extend_from_slice(&self.purchase.to_le_bytes());
        buf.extend_from_slice(&self.purchase_price.to_le_bytes());
        buf.extend_from_slice(&self.dividend.to_le_bytes());
    }

    fn read_le(b: &[u8]) -> Self {
        Dividend {
            time: i32::from_le_bytes(b[0..4].try_into().unwrap()),
            split: f32::from_le_bytes(b[4..8].try_into().unwrap()),
            purchase: f32::from_le_bytes(b[8..12].try_into().unwrap()),
            purchase_price: f32::from_le_bytes(b[12..16].try_into().unwrap()),
            dividend: f32::from_le_bytes(b[16..20].try_into().unwrap()),
        }
    }
}

/// A scalar value inside a [`Tick`] map.
///
/// `untagged` so `json` round-trips produce plain numbers/strings rather
/// than `{"Float": ...}` wrapper objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TickValue {
    /// Interpret this value as `f64`, the common case for price/volume
    /// fields. Returns `None` for [`TickValue::Text`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TickValue::Int(v) => Some(*v as f64),
            TickValue::Float(v) => Some(*v),
            TickValue::Text(_) => None,
        }
    }

    /// Interpret this value as `i64`, truncating floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TickValue::Int(v) => Some(*v),
            TickValue::Float(v) => Some(*v as i64),
            TickValue::Text(_) => None,
        }
    }
}

/// Free-form snapshot of current price and derived stats for one symbol.
///
/// Stored opaquely in [`crate::store::kv_store::KvStore`]'s `ticks`
/// namespace; `BTreeMap` keeps iteration order stable (symbol-sorted) for
/// `get_list` prefix scans and for deterministic `zip` marshaling.
pub type Tick = BTreeMap<String, TickValue>;

/// Read the `timestamp` field of a tick map as a Unix-seconds integer, the
/// convention every provider in the corpus uses to drive `mtime`.
pub fn tick_timestamp(tick: &Tick) -> Option<i64> {
    tick.get("timestamp").and_then(TickValue::as_i64)
}
