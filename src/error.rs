//! Error types for the `datafeed-rs` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, DatafeedError>`.
//!
//! [`DatafeedError`] covers the taxonomy from the design: not-found lookups,
//! malformed requests, authentication failures, corrupt payloads, and fatal
//! I/O errors on the persisted stores. Shape-mismatch conditions are
//! recovered internally (drop-and-recreate) and a snapshot-index-before-open
//! condition is logged by the scheduler; neither reaches a caller as this
//! error type.

/// All possible errors produced by the `datafeed-rs` server.
#[derive(Debug, thiserror::Error)]
pub enum DatafeedError {
    /// Requested symbol, date, or dataset does not exist.
    #[error("Symbol {0} not exists.")]
    SymbolNotFound(String),

    /// Requested data is absent (dataset exists conceptually but holds
    /// nothing for the request).
    #[error("No data.")]
    NoData,

    /// Malformed request framing or an unsupported command.
    #[error("{0}")]
    BadRequest(String),

    /// Operation requires authentication that the connection lacks.
    #[error("operation not permitted")]
    Unauthorized,

    /// A `zip` or marshaled-map payload failed to decode.
    #[error("wrong data format")]
    PayloadCorrupt,

    /// Scheduler tried to archive a minute before the session opened.
    ///
    /// Internal only: logged by the scheduler, never surfaced over the
    /// wire, and the watermark it guards is not advanced for that tick.
    #[error("snapshot index before session open")]
    SnapshotIndex,

    /// Unrecoverable I/O failure on the array file or KV dump file.
    #[error("fatal store I/O error: {0}")]
    Fatal(String),

    /// Failure reading or writing the persisted store files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `bincode` encoding/decoding failure (KV dump, array directory, zip
    /// marshaled maps).
    #[error("binary codec error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),

    /// TOML config parse failure.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DatafeedError>;

impl DatafeedError {
    /// Render the way the wire protocol's `-ERR` reply line wants it.
    pub fn wire_message(&self) -> String {
        match self {
            DatafeedError::SymbolNotFound(s) => format!("Symbol {s} not exists."),
            DatafeedError::NoData => "No data.".to_string(),
            DatafeedError::Unauthorized => "operation not permitted".to_string(),
            DatafeedError::PayloadCorrupt => "wrong data format".to_string(),
            DatafeedError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
