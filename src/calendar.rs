//! Trading-session calendar (§4.1 of the design).
//!
//! A [`Calendar`] is a plain value loaded from config — no exchange class
//! hierarchy, no process-wide singletons (unlike
//! `original_source/datafeed/exchange.py`'s `StockExchange` subclasses). A
//! single deployment serves one trading calendar, or several markets that
//! share identical sessions, per spec §1's non-goals.
//!
//! Wall-clock points are resolved in the process's local timezone, matching
//! the original's `time.mktime` use of system local time.

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{DatafeedError, Result};

/// An hour/minute wall-clock point.
pub type ClockTime = (u32, u32);

/// A trading-session calendar: pre-open, open, optional lunch break, close,
/// and the total number of tradable minutes in a session day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub pre_open: ClockTime,
    pub open: ClockTime,
    /// Lunch break, if the session is split (e.g. `(11, 30)..(13, 0)`).
    pub break_start: Option<ClockTime>,
    pub break_end: Option<ClockTime>,
    pub close: ClockTime,
    /// Total tradable minutes in a session day; the fixed length of every
    /// minute-resolution archive array.
    pub session_minutes: u32,
}

impl Calendar {
    /// Shanghai/Shenzhen-style split session: 09:30–11:30, 13:00–15:00,
    /// pre-open 09:15–09:25, 242 session minutes.
    pub fn sh_sz() -> Calendar {
        Calendar {
            pre_open: (9, 15),
            open: (9, 30),
            break_start: Some((11, 30)),
            break_end: Some((13, 0)),
            close: (15, 0),
            session_minutes: 242,
        }
    }

    /// A continuous single-session market, e.g. NYSE/NASDAQ/LSE-style.
    pub fn continuous(open: ClockTime, close: ClockTime) -> Calendar {
        let minutes = Self::clock_to_minutes(close) - Self::clock_to_minutes(open);
        Calendar {
            pre_open: open,
            open,
            break_start: None,
            break_end: None,
            close,
            session_minutes: minutes as u32,
        }
    }

    fn clock_to_minutes((h, m): ClockTime) -> i64 {
        h as i64 * 60 + m as i64
    }

    /// Resolve a wall-clock point to a Unix-seconds timestamp on `date`.
    fn time_at(&self, date: NaiveDate, clock: ClockTime) -> i64 {
        let naive = date.and_hms_opt(clock.0, clock.1, 0).expect("valid clock");
        Local
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| Local.from_local_datetime(&naive).earliest().unwrap())
            .timestamp()
    }

    /// Local calendar date of a Unix timestamp.
    pub fn date_of(&self, timestamp: i64) -> NaiveDate {
        Local
            .timestamp_opt(timestamp, 0)
            .single()
            .expect("valid timestamp")
            .date_naive()
    }

    /// Pre-open time for the day containing `timestamp`.
    pub fn pre_open_time(&self, timestamp: i64) -> i64 {
        self.time_at(self.date_of(timestamp), self.pre_open)
    }

    /// Market open time for the day containing `timestamp`.
    pub fn open_time(&self, timestamp: i64) -> i64 {
        self.time_at(self.date_of(timestamp), self.open)
    }

    /// Lunch break start for the day containing `timestamp`, if split.
    pub fn break_time(&self, timestamp: i64) -> Option<i64> {
        self.break_start
            .map(|t| self.time_at(self.date_of(timestamp), t))
    }

    /// Lunch break end for the day containing `timestamp`, if split.
    pub fn break_end_time(&self, timestamp: i64) -> Option<i64> {
        self.break_end
            .map(|t| self.time_at(self.date_of(timestamp), t))
    }

    /// Market close time for the day containing `timestamp`.
    pub fn close_time(&self, timestamp: i64) -> i64 {
        self.time_at(self.date_of(timestamp), self.close)
    }

    /// Midnight of `date`, used as the day-array OHLC row timestamp.
    pub fn midnight(&self, date: NaiveDate) -> i64 {
        self.time_at(date, (0, 0))
    }

    /// Morning session length for the compressed minute axis: the number of
    /// compressed indices `[0, morning_len)` before the lunch break, counted
    /// inclusive of the break-start minute itself. For a continuous session
    /// this equals `session_minutes`.
    fn morning_len(&self, open_time: i64, break_start: Option<i64>) -> i64 {
        match break_start {
            Some(bs) => (bs - open_time) / 60 + 1,
            None => self.session_minutes as i64,
        }
    }

    /// Raw (uncompressed, clock-continuous) minute offset of `break_end`
    /// from `open_time`; the raw-index threshold where the afternoon
    /// session resumes.
    fn afternoon_start_raw(&self, open_time: i64, break_end: Option<i64>) -> Option<i64> {
        break_end.map(|be| (be - open_time) / 60)
    }

    /// Translate a tick's wall-clock timestamp into the compressed minute
    /// index of the session containing `reference` (the row's own day),
    /// per §4.1's five branches. Returns the (possibly rewritten) snapshot
    /// timestamp and the compressed index.
    ///
    /// Errors with [`DatafeedError::SnapshotIndex`] if `ts` is from before
    /// the session's pre-open/open (caller's data predates the session).
    pub fn compressed_minute_index(&self, reference: i64, ts: i64) -> Result<(i64, usize)> {
        let open_time = self.open_time(reference);
        let break_start = self.break_time(reference);
        let break_end = self.break_end_time(reference);
        let close_time = self.close_time(reference);

        let raw_index = (ts - open_time).div_euclid(60);
        if raw_index < 0 {
            return Err(DatafeedError::SnapshotIndex);
        }

        let morning_len = self.morning_len(open_time, break_start);
        let total = self.session_minutes as i64;

        let (snapshot_time, mut index) = match (break_start, self.afternoon_start_raw(open_time, break_end)) {
            (Some(bs), Some(afternoon_start_raw)) if raw_index > morning_len - 1 && raw_index < afternoon_start_raw => {
                (bs, morning_len - 1)
            }
            (Some(_), Some(afternoon_start_raw)) if raw_index >= afternoon_start_raw => {
                let lunch_gap = afternoon_start_raw - morning_len;
                (ts, raw_index - lunch_gap)
            }
            _ => (ts, raw_index),
        };

        if index >= total {
            index = total - 1;
            return Ok((close_time, index as usize));
        }

        Ok((snapshot_time, index as usize))
    }
}

/// ISO-8601 year/weekday pair used as the two-axis index into the day
/// archive (§4.2): `(isoyear, (isoweek - 1) * 5 + weekday - 1)`.
pub fn iso_year_index(date: NaiveDate) -> (i32, usize) {
    let iso = date.iso_week();
    let weekday = date.weekday().number_from_monday(); // 1..=7
    let index = (iso.week() as usize - 1) * 5 + weekday as usize - 1;
    (iso.year(), index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_session_has_no_break() {
        let cal = Calendar::continuous((9, 30), (16, 0));
        assert_eq!(cal.session_minutes, 390);
        assert!(cal.break_start.is_none());
    }

    #[test]
    fn morning_index_is_identity() {
        let cal = Calendar::sh_sz();
        let today = Local::now().date_naive();
        let open = cal.time_at(today, cal.open);
        let ts = open + 29 * 60; // 10:00:00 when open is 09:30:00
        let (_, index) = cal.compressed_minute_index(open, ts).unwrap();
        assert_eq!(index, 29);
    }

    #[test]
    fn lunch_break_snaps_to_morning_len_minus_one() {
        let cal = Calendar::sh_sz();
        let today = Local::now().date_naive();
        let open = cal.time_at(today, cal.open);
        let break_start = cal.time_at(today, cal.break_start.unwrap());
        let mid_lunch = break_start + 45 * 60; // 12:15
        let (snap_time, index) = cal.compressed_minute_index(open, mid_lunch).unwrap();
        assert_eq!(snap_time, break_start);
        assert_eq!(index, 120);
    }

    #[test]
    fn afternoon_index_continues_after_gap() {
        let cal = Calendar::sh_sz();
        let today = Local::now().date_naive();
        let open = cal.time_at(today, cal.open);
        let break_end = cal.time_at(today, cal.break_end.unwrap());
        let (_, index_at_break_end) = cal.compressed_minute_index(open, break_end).unwrap();
        let (_, index_one_min_later) =
            cal.compressed_minute_index(open, break_end + 60).unwrap();
        assert_eq!(index_at_break_end, 121);
        assert_eq!(index_one_min_later, 122);
    }

    #[test]
    fn index_past_close_snaps_to_last_row() {
        let cal = Calendar::sh_sz();
        let today = Local::now().date_naive();
        let open = cal.time_at(today, cal.open);
        let close = cal.time_at(today, cal.close);
        let (snap_time, index) = cal.compressed_minute_index(open, close + 600).unwrap();
        assert_eq!(snap_time, close);
        assert_eq!(index, 241);
    }

    #[test]
    fn index_before_open_errors() {
        let cal = Calendar::sh_sz();
        let today = Local::now().date_naive();
        let open = cal.time_at(today, cal.open);
        let err = cal.compressed_minute_index(open, open - 600).unwrap_err();
        assert!(matches!(err, DatafeedError::SnapshotIndex));
    }

    #[test]
    fn iso_year_index_matches_monday_week_one() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let (year, index) = iso_year_index(date);
        assert_eq!(year, 2020);
        assert_eq!(index, 3); // Thursday of ISO week 1: (1-1)*5 + 4-1
    }
}
