//! Pluggable feeds for `crontab_daily` (§4.8). Per §1 these upstream
//! adapters ("specific upstream feed adapters... dividend-adjustment math")
//! are named as external collaborators, not designed in depth — only the
//! seam is. [`NullProvider`] is the default no-op that ships with the
//! server; a real deployment supplies its own implementation.

use crate::error::Result;
use crate::types::Dividend;

pub trait DividendProvider: Send + Sync {
    fn fetch(&self, symbol: &str) -> Result<Vec<Dividend>>;
}

pub trait SectorProvider: Send + Sync {
    fn fetch_all(&self) -> Result<Vec<(String, Vec<String>)>>;
}

/// Fetches nothing; `crontab_daily` becomes a no-op watermark advance.
pub struct NullProvider;

impl DividendProvider for NullProvider {
    fn fetch(&self, _symbol: &str) -> Result<Vec<Dividend>> {
        Ok(Vec::new())
    }
}

impl SectorProvider for NullProvider {
    fn fetch_all(&self) -> Result<Vec<(String, Vec<String>)>> {
        Ok(Vec::new())
    }
}
