//! Persistent typed array archive (§4.2 of the design).
//!
//! The original stored these arrays in an HDF5 file (`data.h5`) with groups
//! `/day`, `/1min`, `/5min`, `/minsnap/<date>`. Per the design notes that
//! file-format choice is not part of the public contract — only the logical
//! paths are. [`FileArrayStore`] keeps the `data.h5` file name and the group
//! naming for on-disk familiarity but encodes the whole archive as one
//! `bincode` document of fixed-length row vectors, replacing the HDF5
//! C binding with a pure-Rust, single-file format. [`ArrayStoreBackend`] is
//! the seam a different backend (e.g. one that reads the original files
//! directly) would implement.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::calendar::iso_year_index;
use crate::constants::{DAY_BOUNDARY_GAP_SECS, WORKING_DAYS_OF_YEAR};
use crate::error::{DatafeedError, Result};
use crate::types::{MinuteSnap, Ohlc, Row};

/// Which intraday OHLC archive a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntradayKind {
    OneMin,
    FiveMin,
}

/// The contract a symbol/day/year-keyed array archive exposes (§4.2).
///
/// A concrete implementation owns whatever on-disk representation it likes;
/// callers only rely on the logical `(kind, symbol, selector)` addressing
/// and the fixed-shape/zero-padding guarantees of §3.
pub trait ArrayStoreBackend: Send {
    fn get_day(&self, symbol: &str, year: i32) -> Result<Vec<Ohlc>>;
    fn get_by_date(&self, symbol: &str, date: NaiveDate) -> Result<Ohlc>;
    fn get_recent_days(&self, symbol: &str, n: usize) -> Result<Vec<Ohlc>>;
    fn update_day(&mut self, symbol: &str, rows: &[Ohlc]) -> Result<()>;
    fn drop_day(&mut self, symbol: &str, year: i32) -> Result<()>;

    fn get_intraday(&self, kind: IntradayKind, symbol: &str, date: NaiveDate) -> Result<Vec<Ohlc>>;
    /// Replace a day's intraday array wholesale, grouped by day boundary.
    /// Mirrors the original's `_require_dataset`/whole-slice write: the
    /// incoming slice always wins, recreating the dataset at its own shape
    /// rather than reindexing rows into a fixed-length array (§4.2/§7).
    fn update_intraday(&mut self, kind: IntradayKind, symbol: &str, rows: &[Ohlc]) -> Result<()>;
    /// Write a single row at an already-computed index, without reindexing
    /// by timestamp. Used by the scheduler's minute-archiving path, which
    /// has already translated wall clock to index via the session
    /// calendar's compressed axis (§4.1).
    fn set_intraday_row(
        &mut self,
        kind: IntradayKind,
        symbol: &str,
        date: NaiveDate,
        expected_len: usize,
        index: usize,
        row: Ohlc,
    ) -> Result<()>;
    fn drop_intraday(&mut self, kind: IntradayKind, symbol: &str, date: NaiveDate) -> Result<()>;

    fn get_minsnap(&self, date: NaiveDate, symbol: &str) -> Result<Vec<MinuteSnap>>;
    /// Replace `date`/`symbol`'s minsnap array verbatim, position-for-position.
    /// Used by callers that already hold a fixed-shape, index-aligned array
    /// (the minute cache's rotation, a whole-array `put_minute`) — never
    /// re-derives row positions from timestamps, since those arrays are
    /// addressed by compressed-axis index, not wall clock (§4.1/§4.4).
    fn put_minsnap(&mut self, date: NaiveDate, symbol: &str, rows: Vec<MinuteSnap>) -> Result<()>;
    fn set_minsnap_row(
        &mut self,
        date: NaiveDate,
        symbol: &str,
        expected_len: usize,
        index: usize,
        row: MinuteSnap,
    ) -> Result<()>;
    fn drop_minsnap(&mut self, date: NaiveDate, symbol: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

#[derive(Serialize, Deserialize, Default)]
struct ArrayFile {
    day: BTreeMap<(String, i32), Vec<Ohlc>>,
    one_min: BTreeMap<(String, NaiveDate), Vec<Ohlc>>,
    five_min: BTreeMap<(String, NaiveDate), Vec<Ohlc>>,
    minsnap: BTreeMap<(NaiveDate, String), Vec<MinuteSnap>>,
}

impl ArrayFile {
    fn intraday(&self, kind: IntradayKind) -> &BTreeMap<(String, NaiveDate), Vec<Ohlc>> {
        match kind {
            IntradayKind::OneMin => &self.one_min,
            IntradayKind::FiveMin => &self.five_min,
        }
    }

    fn intraday_mut(&mut self, kind: IntradayKind) -> &mut BTreeMap<(String, NaiveDate), Vec<Ohlc>> {
        match kind {
            IntradayKind::OneMin => &mut self.one_min,
            IntradayKind::FiveMin => &mut self.five_min,
        }
    }
}

/// `bincode`-backed [`ArrayStoreBackend`]: the whole archive lives in memory
/// and is rewritten to `<datadir>/data.h5` atomically on [`flush`](Self::flush).
pub struct FileArrayStore {
    path: PathBuf,
    data: ArrayFile,
}

impl FileArrayStore {
    /// Open (or create) the array file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<FileArrayStore> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)?
        } else {
            ArrayFile::default()
        };
        Ok(FileArrayStore { path, data })
    }
}

fn midnight_local(date: NaiveDate) -> i64 {
    let naive = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| Local.from_local_datetime(&naive).earliest().unwrap())
        .timestamp()
}

fn date_of_local(timestamp: i64) -> NaiveDate {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .expect("valid timestamp")
        .date_naive()
}

/// Split a time-sorted row slice at gaps larger than
/// [`DAY_BOUNDARY_GAP_SECS`], the edge case from §4.2's algorithmic notes.
fn split_by_day_boundary<T: Row>(rows: &[T]) -> Vec<&[T]> {
    let mut groups = Vec::new();
    if rows.is_empty() {
        return groups;
    }
    let mut start = 0;
    for i in 1..rows.len() {
        let gap = (rows[i].time() as i64 - rows[i - 1].time() as i64).abs();
        if gap > DAY_BOUNDARY_GAP_SECS {
            groups.push(&rows[start..i]);
            start = i;
        }
    }
    groups.push(&rows[start..]);
    groups
}

/// Shared whole-slice upsert for both intraday OHLC arrays and minute
/// snapshots: group by day boundary, then drop and recreate each day's
/// dataset at the incoming slice's own shape (§4.2/§7's shape-mismatch
/// recovery — this always wins, it never reindexes rows into an existing
/// array). Reserved for day-complete writes; a genuinely sparse single-row
/// write goes through `set_row` at an already-computed index instead.
fn update_by_index<T: Row + Copy>(
    map: &mut BTreeMap<(String, NaiveDate), Vec<T>>,
    symbol: &str,
    rows: &[T],
) {
    for group in split_by_day_boundary(rows) {
        if group.is_empty() {
            continue;
        }
        let date = date_of_local(group[0].time() as i64);
        map.insert((symbol.to_string(), date), group.to_vec());
    }
}

fn set_row<T: Row + Copy + Default>(
    map: &mut BTreeMap<(String, NaiveDate), Vec<T>>,
    symbol: &str,
    date: NaiveDate,
    expected_len: usize,
    index: usize,
    row: T,
) {
    let arr = map
        .entry((symbol.to_string(), date))
        .or_insert_with(|| vec![T::default(); expected_len]);
    if arr.len() != expected_len {
        *arr = vec![T::default(); expected_len];
    }
    let idx = index.min(expected_len.saturating_sub(1));
    arr[idx] = row;
}

impl ArrayStoreBackend for FileArrayStore {
    fn get_day(&self, symbol: &str, year: i32) -> Result<Vec<Ohlc>> {
        self.data
            .day
            .get(&(symbol.to_string(), year))
            .cloned()
            .ok_or(DatafeedError::NoData)
    }

    fn get_by_date(&self, symbol: &str, date: NaiveDate) -> Result<Ohlc> {
        let (year, index) = iso_year_index(date);
        let rows = self.get_day(symbol, year)?;
        Ok(rows.get(index).copied().unwrap_or(Ohlc::ZERO))
    }

    fn get_recent_days(&self, symbol: &str, n: usize) -> Result<Vec<Ohlc>> {
        let mut years: Vec<i32> = self
            .data
            .day
            .keys()
            .filter(|(sym, _)| sym == symbol)
            .map(|(_, year)| *year)
            .collect();
        if years.is_empty() {
            return Err(DatafeedError::NoData);
        }
        years.sort_unstable();
        years.dedup();

        let mut collected = Vec::new();
        for year in years {
            if let Some(rows) = self.data.day.get(&(symbol.to_string(), year)) {
                collected.extend(rows.iter().copied().filter(|r| r.time != 0));
            }
        }
        let start = collected.len().saturating_sub(n);
        Ok(collected[start..].to_vec())
    }

    fn update_day(&mut self, symbol: &str, rows: &[Ohlc]) -> Result<()> {
        let mut by_year: BTreeMap<i32, Vec<Ohlc>> = BTreeMap::new();
        for row in rows {
            let date = date_of_local(row.time as i64);
            let (year, index) = iso_year_index(date);
            let arr = by_year
                .entry(year)
                .or_insert_with(|| vec![Ohlc::ZERO; WORKING_DAYS_OF_YEAR]);
            arr[index] = *row;
        }
        for (year, incoming) in by_year {
            let key = (symbol.to_string(), year);
            let existing = self
                .data
                .day
                .entry(key)
                .or_insert_with(|| vec![Ohlc::ZERO; WORKING_DAYS_OF_YEAR]);
            if existing.len() != WORKING_DAYS_OF_YEAR {
                *existing = vec![Ohlc::ZERO; WORKING_DAYS_OF_YEAR];
            }
            for (idx, row) in incoming.into_iter().enumerate() {
                if row.time != 0 {
                    existing[idx] = row;
                }
            }
        }
        Ok(())
    }

    fn drop_day(&mut self, symbol: &str, year: i32) -> Result<()> {
        self.data
            .day
            .remove(&(symbol.to_string(), year))
            .map(|_| ())
            .ok_or(DatafeedError::NoData)
    }

    fn get_intraday(&self, kind: IntradayKind, symbol: &str, date: NaiveDate) -> Result<Vec<Ohlc>> {
        self.data
            .intraday(kind)
            .get(&(symbol.to_string(), date))
            .cloned()
            .ok_or(DatafeedError::NoData)
    }

    fn update_intraday(&mut self, kind: IntradayKind, symbol: &str, rows: &[Ohlc]) -> Result<()> {
        update_by_index(self.data.intraday_mut(kind), symbol, rows);
        Ok(())
    }

    fn set_intraday_row(
        &mut self,
        kind: IntradayKind,
        symbol: &str,
        date: NaiveDate,
        expected_len: usize,
        index: usize,
        row: Ohlc,
    ) -> Result<()> {
        set_row(self.data.intraday_mut(kind), symbol, date, expected_len, index, row);
        Ok(())
    }

    fn drop_intraday(&mut self, kind: IntradayKind, symbol: &str, date: NaiveDate) -> Result<()> {
        self.data
            .intraday_mut(kind)
            .remove(&(symbol.to_string(), date))
            .map(|_| ())
            .ok_or(DatafeedError::NoData)
    }

    fn get_minsnap(&self, date: NaiveDate, symbol: &str) -> Result<Vec<MinuteSnap>> {
        self.data
            .minsnap
            .get(&(date, symbol.to_string()))
            .cloned()
            .ok_or(DatafeedError::NoData)
    }

    fn put_minsnap(&mut self, date: NaiveDate, symbol: &str, rows: Vec<MinuteSnap>) -> Result<()> {
        self.data.minsnap.insert((date, symbol.to_string()), rows);
        Ok(())
    }

    fn set_minsnap_row(
        &mut self,
        date: NaiveDate,
        symbol: &str,
        expected_len: usize,
        index: usize,
        row: MinuteSnap,
    ) -> Result<()> {
        let arr = self
            .data
            .minsnap
            .entry((date, symbol.to_string()))
            .or_insert_with(|| vec![MinuteSnap::ZERO; expected_len]);
        if arr.len() != expected_len {
            *arr = vec![MinuteSnap::ZERO; expected_len];
        }
        let idx = index.min(expected_len.saturating_sub(1));
        arr[idx] = row;
        Ok(())
    }

    fn drop_minsnap(&mut self, date: NaiveDate, symbol: &str) -> Result<()> {
        self.data
            .minsnap
            .remove(&(date, symbol.to_string()))
            .map(|_| ())
            .ok_or(DatafeedError::NoData)
    }

    fn flush(&mut self) -> Result<()> {
        let bytes = bincode::serialize(&self.data)?;
        let tmp = self.path.with_extension("h5.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
