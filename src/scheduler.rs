//! 1 Hz periodic controller: minute archiving, end-of-day rollover, and
//! daily maintenance (§4.8 of the design), plus the deferred-work
//! [`TaskQueue`].

use std::collections::VecDeque;

use chrono::{TimeZone, Timelike};

use crate::calendar::Calendar;
use crate::constants::{
    ARCHIVE_DAY_DELAY_SECS, ARCHIVE_MINUTE_GRACE_SECS, ARCHIVE_MINUTE_RATE_LIMIT_SECS, CRONTAB_HOUR,
    TASK_QUEUE_BATCH, TICK_STALE_SECS,
};
use crate::error::Result;
use crate::providers::{DividendProvider, SectorProvider};
use crate::store::manager::StoreManager;
use crate::types::{tick_timestamp, MinuteSnap, Ohlc, Tick, TickValue};

/// One deferred unit of work, for bursts too large to apply inline.
#[derive(Debug, Clone)]
pub enum TaskItem {
    SetMinuteRow {
        symbol: String,
        reference_ts: i64,
        expected_len: usize,
        index: usize,
        row: MinuteSnap,
    },
}

impl TaskItem {
    fn run(self, now: i64, manager: &mut StoreManager) {
        match self {
            TaskItem::SetMinuteRow {
                symbol,
                reference_ts,
                expected_len,
                index,
                row,
            } => {
                manager.set_minute_row(now, reference_ts, &symbol, expected_len, index, row);
            }
        }
    }
}

/// FIFO of [`TaskItem`]s, drained in batches of at most
/// [`TASK_QUEUE_BATCH`] per scheduler tick.
#[derive(Default)]
pub struct TaskQueue {
    items: VecDeque<TaskItem>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue::default()
    }

    pub fn push(&mut self, item: TaskItem) {
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pop and run up to [`TASK_QUEUE_BATCH`] items; returns how many ran.
    pub fn drain_batch(&mut self, now: i64, manager: &mut StoreManager) -> usize {
        let mut ran = 0;
        while ran < TASK_QUEUE_BATCH {
            let Some(item) = self.items.pop_front() else {
                break;
            };
            item.run(now, manager);
            ran += 1;
        }
        ran
    }
}

/// What a [`Scheduler::tick`] call actually did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub archived_minute: bool,
    pub archived_day: bool,
    pub ran_crontab: bool,
    pub tasks_drained: usize,
}

/// The periodic controller. Runs at 1 Hz against a frozen or real `now`
/// supplied by the caller (never reads the wall clock itself, so tests can
/// freeze it per §8's testable properties).
pub struct Scheduler {
    calendar: Calendar,
    last_archive_minute: i64,
    last_archive_day: i64,
    last_crontab: i64,
    pub task_queue: TaskQueue,
    dividend_provider: Box<dyn DividendProvider>,
    sector_provider: Box<dyn SectorProvider>,
}

impl Scheduler {
    pub fn new(
        calendar: Calendar,
        dividend_provider: Box<dyn DividendProvider>,
        sector_provider: Box<dyn SectorProvider>,
    ) -> Scheduler {
        Scheduler {
            calendar,
            last_archive_minute: 0,
            last_archive_day: 0,
            last_crontab: 0,
            task_queue: TaskQueue::new(),
            dividend_provider,
            sector_provider,
        }
    }

    fn archive_minute_due(&self, now: i64) -> bool {
        let open = self.calendar.open_time(now);
        let close = self.calendar.close_time(now);
        if now < open || now > close + ARCHIVE_MINUTE_GRACE_SECS {
            return false;
        }
        now % 60 == 0 || now - self.last_archive_minute >= ARCHIVE_MINUTE_RATE_LIMIT_SECS
    }

    /// `archive_minute`: rotate the minute cache, then write one
    /// [`MinuteSnap`] row per non-stale tick at its session-compressed
    /// index (§4.1/§4.8). Aborts without advancing the watermark if any
    /// tick's index computes negative (before session open).
    ///
    /// `pub(crate)` so [`crate::handler::Handler`] can dispatch the
    /// internal `archive_minute` command the same way the original
    /// synthesizes a `Request(None, 'archive_minute')` — unconditionally,
    /// without re-checking [`Self::archive_minute_due`].
    pub(crate) fn run_archive_minute(&mut self, now: i64, manager: &mut StoreManager) -> Result<()> {
        manager.rotate_minute_store()?;
        let stale_cutoff = manager.mtime() - TICK_STALE_SECS;
        let ticks: Vec<(String, Tick)> = manager
            .ticks_matching("")
            .into_iter()
            .map(|(s, t)| (s.to_string(), t.clone()))
            .collect();

        let expected_len = self.calendar.session_minutes as usize;
        for (symbol, tick) in ticks {
            let Some(ts) = tick_timestamp(&tick) else {
                continue;
            };
            if ts < stale_cutoff {
                continue;
            }
            let (snapshot_time, index) = self.calendar.compressed_minute_index(now, ts)?;
            let row = MinuteSnap {
                time: snapshot_time as i32,
                price: tick.get("price").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                volume: tick.get("volume").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                amount: tick.get("amount").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
            };
            manager.set_minute_row(now, now, &symbol, expected_len, index, row);
        }
        self.last_archive_minute = now;
        Ok(())
    }

    fn archive_day_due(&self, now: i64, manager: &StoreManager) -> bool {
        let close = self.calendar.close_time(now);
        if now < close + ARCHIVE_DAY_DELAY_SECS {
            return false;
        }
        manager.mtime() >= close && manager.mtime() > self.last_archive_day
    }

    /// `archive_day`: synthesize one `OHLC` row per symbol whose latest
    /// tick falls on `mtime`'s date and append it to the day archive.
    pub(crate) fn run_archive_day(&mut self, manager: &mut StoreManager) -> Result<()> {
        let mtime_date = self.calendar.date_of(manager.mtime());
        let midnight = self.calendar.midnight(mtime_date) as i32;
        let ticks: Vec<(String, Tick)> = manager
            .ticks_matching("")
            .into_iter()
            .map(|(s, t)| (s.to_string(), t.clone()))
            .collect();

        for (symbol, tick) in ticks {
            let Some(ts) = tick_timestamp(&tick) else {
                continue;
            };
            if self.calendar.date_of(ts) != mtime_date {
                continue;
            }
            let row = Ohlc {
                time: midnight,
                open: tick.get("open").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                high: tick.get("high").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                low: tick.get("low").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                close: tick.get("close").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                volume: tick.get("volume").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
                amount: tick.get("amount").and_then(TickValue::as_f64).unwrap_or(0.0) as f32,
            };
            manager.update_day(&symbol, &[row])?;
        }
        self.last_archive_day = manager.mtime();
        Ok(())
    }

    fn crontab_daily_due(&self, now: i64) -> bool {
        let local = match chrono::Local.timestamp_opt(now, 0) {
            chrono::LocalResult::Single(dt) => dt,
            _ => return false,
        };
        if local.hour() != CRONTAB_HOUR || local.minute() != 0 {
            return false;
        }
        local.second() == 0 || now - self.last_crontab > 86_400
    }

    /// `sync_dividend`: pull dividend rows from the configured
    /// [`DividendProvider`] for every currently known symbol and write
    /// them via [`StoreManager::update_dividend`]. One of
    /// `crontab_daily`'s two supplemental sub-commands (§4.7 of
    /// SPEC_FULL.md).
    pub(crate) fn run_sync_dividend(&mut self, manager: &mut StoreManager) -> Result<()> {
        let symbols: Vec<String> = manager
            .ticks_matching("")
            .into_iter()
            .map(|(s, _)| s.to_string())
            .collect();
        for symbol in symbols {
            match self.dividend_provider.fetch(&symbol) {
                Ok(rows) if !rows.is_empty() => manager.update_dividend(&symbol, rows),
                Ok(_) => {}
                Err(err) => tracing::warn!(symbol = %symbol, error = %err, "dividend provider fetch failed"),
            }
        }
        Ok(())
    }

    /// `sync_sector`: pull sector→members groupings from the configured
    /// [`SectorProvider`] and write the `sectors` namespace.
    pub(crate) fn run_sync_sector(&mut self, manager: &mut StoreManager) -> Result<()> {
        match self.sector_provider.fetch_all() {
            Ok(sectors) => {
                for (name, members) in sectors {
                    manager.update_sector(name, members);
                }
            }
            Err(err) => tracing::warn!(error = %err, "sector provider fetch failed"),
        }
        Ok(())
    }

    /// `crontab_daily`: runs [`Self::run_sync_dividend`] then
    /// [`Self::run_sync_sector`].
    fn run_crontab_daily(&mut self, now: i64, manager: &mut StoreManager) -> Result<()> {
        self.run_sync_dividend(manager)?;
        self.run_sync_sector(manager)?;
        self.last_crontab = now;
        Ok(())
    }

    /// Run one scheduler tick: evaluate all three predicates in order, then
    /// drain the task queue.
    pub fn tick(&mut self, now: i64, manager: &mut StoreManager) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();

        if self.archive_minute_due(now) {
            if let Err(err) = self.run_archive_minute(now, manager) {
                tracing::warn!(error = %err, "archive_minute aborted, watermark not advanced");
            } else {
                outcome.archived_minute = true;
            }
        }

        if self.archive_day_due(now, manager) {
            self.run_archive_day(manager)?;
            outcome.archived_day = true;
        }

        if self.crontab_daily_due(now) {
            self.run_crontab_daily(now, manager)?;
            outcome.ran_crontab = true;
        }

        outcome.tasks_drained = self.task_queue.drain_batch(now, manager);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::NullProvider;

    fn scheduler() -> Scheduler {
        Scheduler::new(Calendar::sh_sz(), Box::new(NullProvider), Box::new(NullProvider))
    }

    fn manager(dir: &std::path::Path) -> StoreManager {
        StoreManager::open(dir, Calendar::sh_sz()).unwrap()
    }

    fn tmp_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("scheduler-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn archive_day_fires_once_then_is_idempotent() {
        let dir = tmp_dir("archive-day");
        let mut mgr = manager(&dir);
        let mut sched = scheduler();

        let close = sched.calendar.close_time(0);
        let mut tick = Tick::new();
        tick.insert("timestamp".to_string(), TickValue::Int(close + 181));
        tick.insert("close".to_string(), TickValue::Float(10.0));
        mgr.update_tick(vec![("SYM".to_string(), tick)]);

        let outcome = sched.tick(close + 181, &mut mgr).unwrap();
        assert!(outcome.archived_day);

        let outcome2 = sched.tick(close + 182, &mut mgr).unwrap();
        assert!(!outcome2.archived_day);
    }

    #[test]
    fn task_queue_drains_in_capped_batches() {
        let dir = tmp_dir("taskqueue");
        let mut mgr = manager(&dir);
        let mut sched = scheduler();
        for i in 0..500 {
            sched.task_queue.push(TaskItem::SetMinuteRow {
                symbol: "SYM".to_string(),
                reference_ts: 0,
                expected_len: 242,
                index: i % 242,
                row: MinuteSnap::ZERO,
            });
        }
        let first = sched.task_queue.drain_batch(0, &mut mgr);
        assert_eq!(first, 300);
        let second = sched.task_queue.drain_batch(0, &mut mgr);
        assert_eq!(second, 200);
        let third = sched.task_queue.drain_batch(0, &mut mgr);
        assert_eq!(third, 0);
    }

    #[test]
    fn minute_archive_mid_session_writes_expected_index() {
        let dir = tmp_dir("minute-archive");
        let mut mgr = manager(&dir);
        let mut sched = scheduler();

        let open = sched.calendar.open_time(0);
        let now = open + 30 * 60; // 10:00 when open is 09:30
        let tick_ts = open + 29 * 60 + 30; // 09:59:30
        let mut tick = Tick::new();
        tick.insert("timestamp".to_string(), TickValue::Int(tick_ts));
        tick.insert("price".to_string(), TickValue::Float(3000.0));
        mgr.update_tick(vec![("SH000001".to_string(), tick)]);

        let outcome = sched.tick(now, &mut mgr).unwrap();
        assert!(outcome.archived_minute);

        let rows = mgr.get_minute(now, now, "SH000001").unwrap();
        assert_eq!(rows[29].price, 3000.0);
    }
}
