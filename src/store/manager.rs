//! Owns every store and routes reads/writes by kind and date (§4.5).

use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use crate::calendar::Calendar;
use crate::constants::{ARRAY_STORE_FILE, KV_STORE_FILE};
use crate::error::{DatafeedError, Result};
use crate::store::array_store::{ArrayStoreBackend, FileArrayStore, IntradayKind};
use crate::store::kv_store::KvStore;
use crate::store::minute_cache::{FileMinuteStore, MinuteCache, MinuteStoreBackend};
use crate::types::{tick_timestamp, Dividend, MinuteSnap, Ohlc, Tick};

/// How [`StoreManager::get_minute_store_at`] should pick between the
/// memory- and file-backed minute stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHint {
    /// Memory-backed only if `date == today`.
    Auto,
    ForceMemory,
    ForceFile,
}

/// Owns [`FileArrayStore`], [`KvStore`] and the current day's
/// [`MinuteCache`]; the only component that touches storage directly.
pub struct StoreManager {
    array_store: FileArrayStore,
    kv_store: KvStore,
    minute_cache: Option<MinuteCache>,
    calendar: Calendar,
    mtime: i64,
}

impl StoreManager {
    pub fn open(datadir: impl AsRef<Path>, calendar: Calendar) -> Result<StoreManager> {
        let datadir = datadir.as_ref();
        fs::create_dir_all(datadir)?;
        let array_store = FileArrayStore::open(datadir.join(ARRAY_STORE_FILE))?;
        let kv_store = KvStore::open(datadir.join(KV_STORE_FILE))?;
        Ok(StoreManager {
            array_store,
            kv_store,
            minute_cache: None,
            calendar,
            mtime: 0,
        })
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    // -- ticks -----------------------------------------------------------

    /// Merge incoming ticks into the ticks namespace and advance `mtime`
    /// from the newest timestamp seen (never decreases — §3/§8).
    pub fn update_tick(&mut self, ticks: Vec<(String, Tick)>) {
        for (symbol, tick) in ticks {
            if let Some(ts) = tick_timestamp(&tick) {
                if ts > self.mtime {
                    self.mtime = ts;
                }
            }
            self.kv_store.set_tick(symbol, tick);
        }
    }

    pub fn tick(&self, symbol: &str) -> Option<&Tick> {
        self.kv_store.get_tick(symbol)
    }

    /// Case-insensitive prefix match over resident symbols; empty prefix
    /// matches everything.
    pub fn ticks_matching(&self, prefix: &str) -> Vec<(&str, &Tick)> {
        let needle = prefix.to_ascii_lowercase();
        self.kv_store
            .tick_items()
            .filter(|(symbol, _)| symbol.to_ascii_lowercase().starts_with(&needle))
            .map(|(symbol, tick)| (symbol.as_str(), tick))
            .collect()
    }

    // -- day archive -------------------------------------------------------

    pub fn day(&self, symbol: &str, year: i32) -> Result<Vec<Ohlc>> {
        self.array_store.get_day(symbol, year)
    }

    pub fn day_by_date(&self, symbol: &str, date: NaiveDate) -> Result<Ohlc> {
        self.array_store.get_by_date(symbol, date)
    }

    pub fn recent_days(&self, symbol: &str, n: usize) -> Result<Vec<Ohlc>> {
        self.array_store.get_recent_days(symbol, n)
    }

    pub fn update_day(&mut self, symbol: &str, rows: &[Ohlc]) -> Result<()> {
        self.array_store.update_day(symbol, rows)
    }

    // -- 1-min / 5-min archives ----------------------------------------------

    pub fn intraday(&self, kind: IntradayKind, symbol: &str, date: NaiveDate) -> Result<Vec<Ohlc>> {
        self.array_store.get_intraday(kind, symbol, date)
    }

    pub fn update_intraday(&mut self, kind: IntradayKind, symbol: &str, rows: &[Ohlc]) -> Result<()> {
        self.array_store.update_intraday(kind, symbol, rows)
    }

    // -- minute snapshots --------------------------------------------------

    /// Return the minute store for `date`. Per §4.5: memory-backed if
    /// `hint == ForceMemory`, or `hint == Auto` and `date == today`;
    /// file-backed otherwise. If the cache already holds `date`, reuse it.
    pub fn get_minute_store_at(
        &mut self,
        now: i64,
        timestamp: i64,
        hint: MemoryHint,
    ) -> Box<dyn MinuteStoreBackend + '_> {
        let date = self.calendar.date_of(timestamp);
        let today = self.calendar.date_of(now);
        let use_memory = match hint {
            MemoryHint::ForceMemory => true,
            MemoryHint::ForceFile => false,
            MemoryHint::Auto => date == today,
        };

        if use_memory {
            if self.minute_cache.as_ref().map(|c| c.date()) != Some(date) {
                self.minute_cache = Some(MinuteCache::new(date));
            }
            Box::new(self.minute_cache.as_mut().unwrap())
        } else {
            Box::new(FileMinuteStore::new(&mut self.array_store, date))
        }
    }

    /// Route a bulk minute-snapshot write by its first row's date, per
    /// §4.5's `updateMinute`.
    pub fn update_minute(&mut self, now: i64, symbol: &str, rows: Vec<MinuteSnap>) {
        let Some(first) = rows.first() else {
            return;
        };
        let mut store = self.get_minute_store_at(now, first.time as i64, MemoryHint::Auto);
        store.set(symbol, rows);
    }

    pub fn get_minute(&mut self, now: i64, timestamp: i64, symbol: &str) -> Result<Vec<MinuteSnap>> {
        let store = self.get_minute_store_at(now, timestamp, MemoryHint::Auto);
        store.get(symbol).ok_or(DatafeedError::NoData)
    }

    /// Single-row write at an already-computed index — the scheduler's
    /// `archive_minute` path, which has already resolved the compressed
    /// session-axis index (§4.1) and must not be re-indexed here.
    pub fn set_minute_row(
        &mut self,
        now: i64,
        reference_ts: i64,
        symbol: &str,
        expected_len: usize,
        index: usize,
        row: MinuteSnap,
    ) {
        let mut store = self.get_minute_store_at(now, reference_ts, MemoryHint::Auto);
        store.create_dataset(symbol, expected_len);
        store.set_row(symbol, expected_len, index, row);
    }

    /// Symbols resident in the *current* memory-backed cache, for the
    /// scheduler's `archive_minute` scan. Empty if no cache is active.
    pub fn minute_cache_symbols(&self) -> Vec<String> {
        self.minute_cache
            .as_ref()
            .map(MinuteCache::symbols)
            .unwrap_or_default()
    }

    pub fn minute_cache_date(&self) -> Option<NaiveDate> {
        self.minute_cache.as_ref().map(MinuteCache::date)
    }

    /// If the cache's date has fallen behind the date implied by the
    /// current `mtime`, persist it into the archive and discard it.
    pub fn rotate_minute_store(&mut self) -> Result<()> {
        let implied_date = self.calendar.date_of(self.mtime);
        let should_rotate = self
            .minute_cache
            .as_ref()
            .is_some_and(|cache| cache.date() != implied_date);
        if should_rotate {
            let mut cache = self.minute_cache.take().expect("checked above");
            cache.rotate(&mut self.array_store)?;
        }
        Ok(())
    }

    // -- dividends ---------------------------------------------------------

    pub fn dividend(&self, symbol: &str) -> Vec<Dividend> {
        self.kv_store.get_dividend(symbol).cloned().unwrap_or_default()
    }

    /// Write the dividend array for `symbol`; on a length conflict with the
    /// existing value, delete first (§4.5).
    pub fn update_dividend(&mut self, symbol: &str, rows: Vec<Dividend>) {
        if let Some(existing) = self.kv_store.get_dividend(symbol) {
            if existing.len() != rows.len() {
                self.kv_store.delete_dividend(symbol);
            }
        }
        self.kv_store.set_dividend(symbol.to_string(), rows);
    }

    // -- sectors -------------------------------------------------------------

    pub fn sector(&self, name: &str) -> Option<&Vec<String>> {
        self.kv_store.get_sector(name)
    }

    pub fn update_sector(&mut self, name: String, members: Vec<String>) {
        self.kv_store.set_sector(name, members);
    }

    // -- opaque namespaces (meta/depth/trade) -------------------------------

    pub fn opaque(&self, namespace: &str, key: &str) -> Option<&Vec<u8>> {
        self.kv_store.get_opaque(namespace, key)
    }

    pub fn set_opaque(&mut self, namespace: &str, key: String, value: Vec<u8>) {
        self.kv_store.set_opaque(namespace, key, value);
    }

    // -- lifecycle -----------------------------------------------------------

    pub fn flush(&mut self) -> Result<()> {
        self.array_store.flush()?;
        self.kv_store.flush()
    }

    /// Rotate any live minute cache, flush both stores, and mark the KV
    /// store closed.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut cache) = self.minute_cache.take() {
            cache.rotate(&mut self.array_store)?;
        }
        self.array_store.flush()?;
        self.kv_store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> StoreManager {
        StoreManager::open(dir, Calendar::sh_sz()).unwrap()
    }

    fn tmp_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("store-manager-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn update_tick_advances_mtime_monotonically() {
        let dir = tmp_dir("mtime");
        let mut mgr = manager(&dir);

        let mut tick = Tick::new();
        tick.insert("timestamp".to_string(), crate::types::TickValue::Int(100));
        mgr.update_tick(vec![("SYM".to_string(), tick.clone())]);
        assert_eq!(mgr.mtime(), 100);

        let mut older = Tick::new();
        older.insert("timestamp".to_string(), crate::types::TickValue::Int(50));
        mgr.update_tick(vec![("SYM".to_string(), older)]);
        assert_eq!(mgr.mtime(), 100);
    }

    #[test]
    fn rotate_minute_store_persists_when_date_advances() {
        let dir = tmp_dir("rotate");
        let mut mgr = manager(&dir);

        let today_ts = mgr.calendar.open_time(0);
        mgr.set_minute_row(
            today_ts,
            today_ts,
            "SYM",
            242,
            0,
            MinuteSnap {
                time: today_ts as i32,
                price: 42.0,
                volume: 0.0,
                amount: 0.0,
            },
        );
        assert!(mgr.minute_cache_date().is_some());

        let next_day_ts = today_ts + 24 * 3600;
        mgr.mtime = next_day_ts;
        mgr.rotate_minute_store().unwrap();
        assert!(mgr.minute_cache_date().is_none());

        let date = mgr.calendar.date_of(today_ts);
        let archived = mgr.array_store.get_minsnap(date, "SYM").unwrap();
        assert_eq!(archived[0].price, 42.0);
    }

    #[test]
    fn update_dividend_replaces_on_shape_conflict() {
        let dir = tmp_dir("dividend");
        let mut mgr = manager(&dir);
        mgr.update_dividend("SYM", vec![Dividend::ZERO; 2]);
        mgr.update_dividend("SYM", vec![Dividend::ZERO; 5]);
        assert_eq!(mgr.dividend("SYM").len(), 5);
    }
}
