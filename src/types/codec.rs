//! Payload encodings carried in protocol bulk bodies (§4.6): `json`, `npy`,
//! `zip`, and `plain`.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DatafeedError, Result};
use crate::types::rows::{Row, Tick};

/// The format tag that is always the last argument of a command (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Npy,
    Zip,
    Plain,
}

impl Format {
    /// Parse the format tag token, case-insensitively.
    pub fn parse(tag: &str) -> Result<Format> {
        match tag.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "npy" => Ok(Format::Npy),
            "zip" => Ok(Format::Zip),
            "plain" => Ok(Format::Plain),
            other => Err(DatafeedError::BadRequest(format!(
                "unknown payload format {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// npy — self-describing little-endian array format
// ---------------------------------------------------------------------------
//
// Layout: magic "DFN1", a u8 length-prefixed dtype name, a little-endian u32
// row count, then that many fixed-width rows. The dtype name is checked on
// decode so a client that sends a 1-min OHLC blob where a MinuteSnap array
// was expected gets a clear `PayloadCorrupt`-style error instead of a
// silent misinterpretation of the bytes.

const NPY_MAGIC: &[u8; 4] = b"DFN1";

/// Encode a row slice into the self-describing `npy` binary format.
pub fn npy_encode<T: Row>(rows: &[T]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + T::DTYPE_NAME.len() + rows.len() * T::ROW_BYTES);
    buf.extend_from_slice(NPY_MAGIC);
    buf.push(T::DTYPE_NAME.len() as u8);
    buf.extend_from_slice(T::DTYPE_NAME.as_bytes());
    buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    for row in rows {
        row.write_le(&mut buf);
    }
    buf
}

/// Decode a row slice from the `npy` binary format, verifying the dtype
/// name and the declared row count against the available bytes.
pub fn npy_decode<T: Row>(data: &[u8]) -> Result<Vec<T>> {
    if data.len() < 4 {
        return Err(DatafeedError::PayloadCorrupt);
    }
    if &data[0..4] != NPY_MAGIC {
        return Err(DatafeedError::PayloadCorrupt);
    }
    let name_len = *data.get(4).ok_or(DatafeedError::PayloadCorrupt)? as usize;
    let name_start = 5;
    let name_end = name_start + name_len;
    let header_end = name_end + 4;
    let name = data
        .get(name_start..name_end)
        .ok_or(DatafeedError::PayloadCorrupt)?;
    if name != T::DTYPE_NAME.as_bytes() {
        return Err(DatafeedError::BadRequest(format!(
            "dtype mismatch: expected {}, got {}",
            T::DTYPE_NAME,
            String::from_utf8_lossy(name)
        )));
    }
    let count_bytes = data
        .get(name_end..header_end)
        .ok_or(DatafeedError::PayloadCorrupt)?;
    let count = u32::from_le_bytes(count_bytes.try_into().unwrap()) as usize;
    let body = &data[header_end..];
    if body.len() != count * T::ROW_BYTES {
        return Err(DatafeedError::PayloadCorrupt);
    }
    let mut rows = Vec::with_capacity(count);
    for chunk in body.chunks_exact(T::ROW_BYTES) {
        rows.push(T::read_le(chunk));
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// json — plain serde_json round-trip
// ---------------------------------------------------------------------------

/// Encode any serializable value as JSON bytes.
pub fn json_encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode JSON bytes into any deserializable value.
pub fn json_decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}

// ---------------------------------------------------------------------------
// zip — RFC 1950 deflate wrapping a bincode-marshaled map
// ---------------------------------------------------------------------------

/// Deflate-compress arbitrary bytes (RFC 1950, `zlib` framing).
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate RFC 1950 deflate bytes back to the original payload.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| DatafeedError::PayloadCorrupt)?;
    Ok(out)
}

/// Decode a `put_ticks` `zip` payload: deflate, then a `bincode`-marshaled
/// `Vec<(symbol, Tick)>` — our typed stand-in for the original's
/// `marshal.dumps(dict)`.
pub fn decode_marshaled_ticks(data: &[u8]) -> Result<Vec<(String, Tick)>> {
    let raw = inflate(data).map_err(|_| DatafeedError::PayloadCorrupt)?;
    bincode::deserialize(&raw).map_err(|_| DatafeedError::PayloadCorrupt)
}

/// Encode a `Vec<(symbol, Tick)>` the way [`decode_marshaled_ticks`] expects
/// to read it back; used by tests and by any in-process adapter that wants
/// to hand a pre-built `zip` blob to the handler.
pub fn encode_marshaled_ticks(ticks: &[(String, Tick)]) -> Result<Vec<u8>> {
    let raw = bincode::serialize(ticks)?;
    deflate(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows::Ohlc;

    #[test]
    fn npy_round_trips_ohlc() {
        let rows = vec![
            Ohlc {
                time: 1_600_000_000,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 100.0,
                amount: 150.0,
            },
            Ohlc::ZERO,
        ];
        let encoded = npy_encode(&rows);
        let decoded: Vec<Ohlc> = npy_decode(&encoded).unwrap();
        assert_eq!(rows, decoded);
    }

    #[test]
    fn npy_rejects_dtype_mismatch() {
        use crate::types::rows::MinuteSnap;

        let rows = vec![Ohlc::ZERO];
        let encoded = npy_encode(&rows);
        let decoded = npy_decode::<MinuteSnap>(&encoded);
        assert!(decoded.is_err());
    }

    #[test]
    fn marshaled_ticks_round_trip() {
        let mut tick = Tick::new();
        tick.insert(
            "price".to_string(),
            crate::types::rows::TickValue::Float(12.5),
        );
        let input = vec![("SH000001".to_string(), tick)];
        let blob = encode_marshaled_ticks(&input).unwrap();
        let decoded = decode_marshaled_ticks(&blob).unwrap();
        assert_eq!(input, decoded);
    }

    #[test]
    fn zip_garbage_is_payload_corrupt() {
        let err = decode_marshaled_ticks(b"not deflate data").unwrap_err();
        assert!(matches!(err, DatafeedError::PayloadCorrupt));
    }
}
