//! Constants for the datafeed server.
//!
//! Contains default network settings, on-disk file names, and scheduler
//! timing constants. These are used internally by
//! [`crate::server::Server`] and [`crate::scheduler::Scheduler`], but are
//! also exported for advanced usage.

// ---------------------------------------------------------------------------
// Network defaults
// ---------------------------------------------------------------------------

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 8082;

/// Default data directory, relative to the process working directory.
pub const DEFAULT_DATADIR: &str = "./var";

// ---------------------------------------------------------------------------
// Persisted file names (contractual — on-disk paths other tooling may rely on)
// ---------------------------------------------------------------------------

/// File name of the array archive within `datadir`.
pub const ARRAY_STORE_FILE: &str = "data.h5";

/// File name of the key/value dump within `datadir`.
pub const KV_STORE_FILE: &str = "dstore.dump";

/// Directory name of the optional secondary archive backend.
pub const RDB_DIR: &str = "rdb";

// ---------------------------------------------------------------------------
// Archive group names (contractual paths within the array store)
// ---------------------------------------------------------------------------

/// Group name for the daily OHLC archive.
pub const GROUP_DAY: &str = "day";

/// Group name for the 1-minute OHLC archive.
pub const GROUP_1MIN: &str = "1min";

/// Group name for the 5-minute OHLC archive.
pub const GROUP_5MIN: &str = "5min";

/// Group name prefix for per-day minute-snapshot archives.
pub const GROUP_MINSNAP: &str = "minsnap";

// ---------------------------------------------------------------------------
// KV namespaces
// ---------------------------------------------------------------------------

/// Namespace holding current tick snapshots.
pub const NS_TICKS: &str = "ticks";

/// Namespace holding dividend row arrays, keyed by symbol.
pub const NS_DIVIDENDS: &str = "dividends";

/// Namespace holding sector → member-symbol groupings.
pub const NS_SECTORS: &str = "sectors";

// ---------------------------------------------------------------------------
// Day archive shape
// ---------------------------------------------------------------------------

/// ISO 8601 years span at most 53 full weeks of 5 working days each; a
/// single logical year of daily OHLCs fits in one fixed-length array of
/// this size.
pub const WORKING_DAYS_OF_YEAR: usize = 53 * 5;

// ---------------------------------------------------------------------------
// Scheduler timing
// ---------------------------------------------------------------------------

/// Scheduler tick interval.
pub const SCHEDULER_TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Grace period after session close during which `archive_minute` still runs.
pub const ARCHIVE_MINUTE_GRACE_SECS: i64 = 5 * 60;

/// Minimum spacing between successive `archive_minute` runs outside of the
/// top of each minute.
pub const ARCHIVE_MINUTE_RATE_LIMIT_SECS: i64 = 60;

/// Delay after session close before `archive_day` is allowed to run, to let
/// the last ticks of the day settle.
pub const ARCHIVE_DAY_DELAY_SECS: i64 = 3 * 60;

/// A tick older than this relative to the current minute-archive run is
/// considered stale/suspended and skipped.
pub const TICK_STALE_SECS: i64 = 30 * 60;

/// Hour of day (local time) at which `crontab_daily` fires.
pub const CRONTAB_HOUR: u32 = 8;

/// Maximum number of deferred [`crate::scheduler::TaskQueue`] items drained
/// per scheduler tick.
pub const TASK_QUEUE_BATCH: usize = 300;

/// Two consecutive intraday rows farther apart than this start a new
/// logical trading day in array-store slice detection.
pub const DAY_BOUNDARY_GAP_SECS: i64 = 2 * 60 * 60;
