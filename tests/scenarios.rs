//! End-to-end command-surface scenarios from §8 of the design, driven
//! through [`Handler::dispatch`] the way a real client's request/reply
//! pairs would look, rather than through the lower-level store APIs unit
//! tests elsewhere in the crate already cover.

use chrono::NaiveDate;
use datafeed_rs::calendar::Calendar;
use datafeed_rs::handler::Handler;
use datafeed_rs::protocol::frame::{Reply, Request};
use datafeed_rs::providers::NullProvider;
use datafeed_rs::scheduler::TaskItem;
use datafeed_rs::store::manager::StoreManager;
use datafeed_rs::types::codec;
use datafeed_rs::types::{MinuteSnap, Ohlc, Tick, TickValue};

fn tmp_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("scenarios-{label}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn handler_with_calendar(dir: &std::path::Path, calendar: Calendar) -> Handler {
    let manager = StoreManager::open(dir, calendar).unwrap();
    Handler::new(manager, calendar, Box::new(NullProvider), Box::new(NullProvider))
}

fn req(command: &str, args: &[&[u8]]) -> Request {
    Request {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_vec()).collect(),
    }
}

/// Scenario 2: tick round-trip. `put_ticks` with a marshaled map moves
/// `mtime` forward and makes the tick readable via `get_tick`.
#[test]
fn tick_round_trip_updates_mtime_and_is_readable() {
    let mut h = handler_with_calendar(&tmp_dir("tick-roundtrip"), Calendar::sh_sz());

    let t0 = 1_291_167_000;
    let mut tick = Tick::new();
    tick.insert("timestamp".to_string(), TickValue::Int(t0));
    tick.insert("price".to_string(), TickValue::Float(2856.99));
    tick.insert("open".to_string(), TickValue::Float(2868.73));
    let blob = codec::encode_marshaled_ticks(&[("SH000001".to_string(), tick)]).unwrap();

    let reply = h.dispatch(t0, &req("put_ticks", &[&blob]));
    assert_eq!(reply, Reply::Ok);

    let reply = h.dispatch(t0, &req("get_mtime", &[]));
    assert_eq!(reply, Reply::Integer(t0));

    let Reply::Bulk(body) = h.dispatch(t0, &req("get_tick", &[b"SH000001", b"json"])) else {
        panic!("expected bulk reply")
    };
    let decoded: Tick = serde_json::from_slice(&body).unwrap();
    assert_eq!(decoded.get("price").unwrap().as_f64(), Some(2856.99));
}

/// Scenario 3: minute archive mid-session. A tick just before a frozen
/// clock gets archived at the expected compressed-axis index.
#[test]
fn minute_archive_mid_session_lands_at_expected_index() {
    let calendar = Calendar::sh_sz();
    let mut h = handler_with_calendar(&tmp_dir("minute-archive"), calendar);

    let open = calendar.open_time(0);
    let now = open + 30 * 60; // 10:00:00 when open is 09:30:00
    let tick_ts = open + 29 * 60 + 30; // 09:59:30

    let mut tick = Tick::new();
    tick.insert("timestamp".to_string(), TickValue::Int(tick_ts));
    tick.insert("price".to_string(), TickValue::Float(3000.0));
    let blob = codec::encode_marshaled_ticks(&[("SH000001".to_string(), tick)]).unwrap();
    h.dispatch(tick_ts, &req("put_ticks", &[&blob]));

    let outcome = h.tick(now).unwrap();
    assert!(outcome.archived_minute);

    let Reply::Bulk(body) = h.dispatch(now, &req("get_minute", &[b"SH000001", b"0", b"npy"])) else {
        panic!("expected bulk reply")
    };
    let rows: Vec<MinuteSnap> = codec::npy_decode(&body).unwrap();
    assert_eq!(rows.len(), 242);
    assert_eq!(rows[29].price, 3000.0);
}

/// Scenario 5: shape-mismatch recovery. Re-`put_1minute`-ing a date with
/// a differently-shaped array replaces the on-disk dataset outright.
#[test]
fn put_1minute_shape_mismatch_replaces_dataset() {
    let mut h = handler_with_calendar(&tmp_dir("shape-mismatch"), Calendar::continuous((9, 30), (16, 0)));
    let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();

    let make_rows = |n: usize, day_open_ts: i64| -> Vec<Ohlc> {
        (0..n)
            .map(|i| Ohlc {
                time: (day_open_ts + i as i64 * 60) as i32,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                amount: 1.0,
            })
            .collect()
    };

    // Use midnight UTC-ish local seconds for the date as a stand-in day-open;
    // exact wall-clock alignment isn't load-bearing for this test, only that
    // both slices land on the same calendar date.
    let day_open_ts = date.and_hms_opt(9, 30, 0).unwrap().and_utc().timestamp();

    let rows_242 = make_rows(242, day_open_ts);
    let blob_242 = codec::npy_encode(&rows_242);
    h.dispatch(0, &req("put_1minute", &[b"SYM", &blob_242]));

    let rows_288 = make_rows(288, day_open_ts);
    let blob_288 = codec::npy_encode(&rows_288);
    h.dispatch(0, &req("put_1minute", &[b"SYM", &blob_288]));

    let date_str = date.format("%Y%m%d").to_string();
    let Reply::Bulk(body) = h.dispatch(
        0,
        &req("get_1minute", &[b"SYM", date_str.as_bytes(), b"npy"]),
    ) else {
        panic!("expected bulk reply")
    };
    let rows: Vec<Ohlc> = codec::npy_decode(&body).unwrap();
    assert_eq!(rows.len(), 288);
}

/// Scenario 6: deferred tasks. 500 enqueued `TaskQueue` items drain in
/// 300/200/0-item batches across three scheduler ticks.
///
/// `TaskQueue` has no wire command of its own (§4.8: it exists for write
/// bursts too large for the inline archive path, not for clients), so this
/// drives it the way the scheduler itself would: push items, then tick.
#[test]
fn task_queue_drains_across_ticks() {
    let calendar = Calendar::sh_sz();
    let mut manager = StoreManager::open(&tmp_dir("task-queue"), calendar).unwrap();
    let mut scheduler = datafeed_rs::scheduler::Scheduler::new(
        calendar,
        Box::new(NullProvider),
        Box::new(NullProvider),
    );

    for i in 0..500 {
        scheduler.task_queue.push(TaskItem::SetMinuteRow {
            symbol: "SYM".to_string(),
            reference_ts: 0,
            expected_len: 242,
            index: i % 242,
            row: MinuteSnap::ZERO,
        });
    }

    assert_eq!(scheduler.task_queue.drain_batch(0, &mut manager), 300);
    assert_eq!(scheduler.task_queue.drain_batch(0, &mut manager), 200);
    assert_eq!(scheduler.task_queue.drain_batch(0, &mut manager), 0);
}
