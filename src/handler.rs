//! Maps each wire command to [`StoreManager`] operations with payload
//! codec selection, and records per-method timing stats (§4.7 of the
//! design).

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::Calendar;
use crate::error::{DatafeedError, Result};
use crate::protocol::frame::{Reply, Request};
use crate::providers::{DividendProvider, SectorProvider};
use crate::scheduler::{Scheduler, TickOutcome};
use crate::store::array_store::IntradayKind;
use crate::store::manager::StoreManager;
use crate::types::codec::{self, Format};
use crate::types::{Dividend, MinuteSnap, Ohlc, Row, Tick};

/// One command's accumulated `{min, max, total, count}` timing, all in
/// microseconds. Exposed over the wire by `get_stats`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatEntry {
    pub min: u64,
    pub max: u64,
    pub total: u64,
    pub count: u64,
}

impl StatEntry {
    fn record(&mut self, micros: u64) {
        self.min = if self.count == 0 { micros } else { self.min.min(micros) };
        self.max = self.max.max(micros);
        self.total += micros;
        self.count += 1;
    }
}

/// Per-method timing, keyed by command name.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats(BTreeMap<String, StatEntry>);

impl Stats {
    fn record(&mut self, method: &str, micros: u64) {
        self.0.entry(method.to_string()).or_default().record(micros);
    }
}

/// Encode a row slice per the requested [`Format`]; only `npy` and `json`
/// are valid reply encodings for array-shaped gets (§4.7's `npy|json`
/// columns).
fn encode_rows<T: Row + Serialize>(rows: &[T], format: Format) -> Result<Reply> {
    match format {
        Format::Npy => Ok(Reply::Bulk(codec::npy_encode(rows))),
        Format::Json => Ok(Reply::Bulk(codec::json_encode(&rows)?)),
        other => Err(DatafeedError::BadRequest(format!("unsupported format for this command: {other:?}"))),
    }
}

fn parse_yyyymmdd(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|_| DatafeedError::BadRequest(format!("malformed date {s}")))
}

/// Maps every command of §4.7 onto [`StoreManager`] operations. Owns the
/// [`Scheduler`] too, so the scheduler's internal commands
/// (`archive_minute`, `archive_day`, `crontab_daily`, ...) are ordinary
/// dispatch-table entries alongside the network-reachable ones, matching
/// the original's `Request(None, 'archive_minute')` self-dispatch.
pub struct Handler {
    manager: StoreManager,
    scheduler: Scheduler,
    stats: Stats,
}

impl Handler {
    pub fn new(
        manager: StoreManager,
        calendar: Calendar,
        dividend_provider: Box<dyn DividendProvider>,
        sector_provider: Box<dyn SectorProvider>,
    ) -> Handler {
        Handler {
            manager,
            scheduler: Scheduler::new(calendar, dividend_provider, sector_provider),
            stats: Stats::default(),
        }
    }

    pub fn mtime(&self) -> i64 {
        self.manager.mtime()
    }

    /// Run one 1 Hz scheduler tick (the real production path; the
    /// `archive_minute`/`archive_day`/`crontab_daily` dispatch entries
    /// below are for internal/test invocation, not this loop).
    pub fn tick(&mut self, now: i64) -> Result<TickOutcome> {
        self.scheduler.tick(now, &mut self.manager)
    }

    /// Flush both stores; called on graceful shutdown.
    pub fn close(&mut self) -> Result<()> {
        self.manager.close()
    }

    /// Dispatch one request, recording its wall-clock cost in [`Stats`]
    /// regardless of outcome.
    pub fn dispatch(&mut self, now: i64, req: &Request) -> Reply {
        let start = Instant::now();
        let result = self.execute(now, req);
        let micros = start.elapsed().as_micros() as u64;
        self.stats.record(&req.command, micros);
        match result {
            Ok(reply) => reply,
            Err(err) => err.into(),
        }
    }

    fn execute(&mut self, now: i64, req: &Request) -> Result<Reply> {
        match req.command.as_str() {
            "get_mtime" => Ok(Reply::Integer(self.manager.mtime())),

            "get_list" => {
                let prefix = req.arg_str(0)?;
                let ticks: BTreeMap<String, Tick> = self
                    .manager
                    .ticks_matching(prefix)
                    .into_iter()
                    .map(|(s, t)| (s.to_string(), t.clone()))
                    .collect();
                Ok(Reply::Bulk(codec::json_encode(&ticks)?))
            }

            "get_tick" => {
                let symbol = req.arg_str(0)?;
                let tick = self
                    .manager
                    .tick(symbol)
                    .ok_or_else(|| DatafeedError::SymbolNotFound(symbol.to_string()))?;
                Ok(Reply::Bulk(codec::json_encode(tick)?))
            }

            "get_ticks" => {
                // Args are `symbol...` followed by the format tag; only
                // `json` is meaningful here, so every arg but the last is
                // a symbol.
                let symbols = &req.args[..req.args.len().saturating_sub(1)];
                let mut found: BTreeMap<String, &Tick> = BTreeMap::new();
                for raw in symbols {
                    let symbol = std::str::from_utf8(raw)
                        .map_err(|_| DatafeedError::BadRequest("get_ticks: non-UTF-8 symbol".to_string()))?;
                    if let Some(tick) = self.manager.tick(symbol) {
                        found.insert(symbol.to_string(), tick);
                    }
                }
                Ok(Reply::Bulk(codec::json_encode(&found)?))
            }

            "get_minute" => {
                let symbol = req.arg_str(0)?;
                let ts: i64 = req
                    .arg_str(1)?
                    .parse()
                    .map_err(|_| DatafeedError::BadRequest("get_minute: malformed timestamp".to_string()))?;
                let format = Format::parse(req.arg_str(2)?)?;
                let at = if ts == 0 { now } else { ts };
                let rows = self.manager.get_minute(now, at, symbol)?;
                encode_rows(&rows, format)
            }

            "get_1minute" => self.get_intraday(req, IntradayKind::OneMin),
            "get_5minute" => self.get_intraday(req, IntradayKind::FiveMin),

            "get_day" => {
                let symbol = req.arg_str(0)?;
                let selector = req.arg_str(1)?;
                let format = Format::parse(req.arg_str(2)?)?;
                if selector.len() == 8 && selector.bytes().all(|b| b.is_ascii_digit()) {
                    let date = parse_yyyymmdd(selector)?;
                    let row = self.manager.day_by_date(symbol, date)?;
                    encode_rows(&[row], format)
                } else {
                    let n: usize = selector
                        .parse()
                        .map_err(|_| DatafeedError::BadRequest("get_day: malformed selector".to_string()))?;
                    let rows = self.manager.recent_days(symbol, n)?;
                    encode_rows(&rows, format)
                }
            }

            "get_dividend" => {
                let symbol = req.arg_str(0)?;
                let format = Format::parse(req.arg_str(1)?)?;
                let rows = self.manager.dividend(symbol);
                encode_rows(&rows, format)
            }

            "get_sector" => {
                let name = req.arg_str(0)?;
                let members = self.manager.sector(name).cloned().unwrap_or_default();
                Ok(Reply::Bulk(codec::json_encode(&members)?))
            }

            "get_stats" => Ok(Reply::Bulk(codec::json_encode(&self.stats)?)),

            "put_ticks" => {
                let blob = req.arg(0)?;
                let ticks = codec::decode_marshaled_ticks(blob)?;
                self.manager.update_tick(ticks);
                Ok(Reply::Ok)
            }

            "put_tick" => {
                let symbol = req.arg_str(0)?;
                let _ts = req.arg_str(1)?; // carried for parity with the wire contract; timestamp lives inside the tick map too
                let blob = req.arg(2)?;
                let raw = codec::inflate(blob)?;
                let tick: Tick = bincode::deserialize(&raw).map_err(|_| DatafeedError::PayloadCorrupt)?;
                self.manager.update_tick(vec![(symbol.to_string(), tick)]);
                Ok(Reply::Ok)
            }

            "put_minute" => {
                let symbol = req.arg_str(0)?;
                let blob = req.arg(1)?;
                let rows: Vec<MinuteSnap> = codec::npy_decode(blob)?;
                self.manager.update_minute(now, symbol, rows);
                Ok(Reply::Ok)
            }

            "put_1minute" => self.put_intraday(req, IntradayKind::OneMin),
            "put_5minute" => self.put_intraday(req, IntradayKind::FiveMin),

            "put_day" => {
                let symbol = req.arg_str(0)?;
                let blob = req.arg(1)?;
                let rows: Vec<Ohlc> = codec::npy_decode(blob)?;
                self.manager.update_day(symbol, &rows)?;
                Ok(Reply::Ok)
            }

            "put_meta" => self.put_opaque("meta", req),
            "put_depth" => self.put_opaque("depth", req),
            "put_trade" => self.put_opaque("trade", req),
            "mput_trade" => self.mput_opaque("trade", req),

            "archive_minute" => {
                self.scheduler.run_archive_minute(now, &mut self.manager)?;
                Ok(Reply::Ok)
            }
            "archive_day" => {
                self.scheduler.run_archive_day(&mut self.manager)?;
                Ok(Reply::Ok)
            }
            "crontab_daily" => {
                self.scheduler.run_sync_dividend(&mut self.manager)?;
                self.scheduler.run_sync_sector(&mut self.manager)?;
                Ok(Reply::Ok)
            }
            "sync_dividend" => {
                self.scheduler.run_sync_dividend(&mut self.manager)?;
                Ok(Reply::Ok)
            }
            "sync_sector" => {
                self.scheduler.run_sync_sector(&mut self.manager)?;
                Ok(Reply::Ok)
            }

            other => Err(DatafeedError::BadRequest(format!("UNKNOWN COMMAND {other}"))),
        }
    }

    fn get_intraday(&mut self, req: &Request, kind: IntradayKind) -> Result<Reply> {
        let symbol = req.arg_str(0)?;
        let date = parse_yyyymmdd(req.arg_str(1)?)?;
        let format = Format::parse(req.arg_str(2)?)?;
        let rows = self.manager.intraday(kind, symbol, date)?;
        encode_rows(&rows, format)
    }

    fn put_intraday(&mut self, req: &Request, kind: IntradayKind) -> Result<Reply> {
        let symbol = req.arg_str(0)?;
        let blob = req.arg(1)?;
        let rows: Vec<Ohlc> = codec::npy_decode(blob)?;
        self.manager.update_intraday(kind, symbol, &rows)?;
        Ok(Reply::Ok)
    }

    /// Decode a payload per its format tag into raw bytes suitable for
    /// opaque storage: `zip` is inflated, `json`/`plain`/`npy` are stored
    /// as-is since the opaque namespaces don't interpret their contents.
    fn decode_opaque_payload(payload: &[u8], format: Format) -> Result<Vec<u8>> {
        match format {
            Format::Zip => codec::inflate(payload),
            Format::Json | Format::Plain | Format::Npy => Ok(payload.to_vec()),
        }
    }

    /// `put_meta`/`put_depth`/`put_trade`: `symbol, [ts], payload, tag`.
    /// The optional timestamp has no bearing on the opaque namespaces
    /// (they have no archive shape to index into); its presence only
    /// shifts where the payload argument falls.
    fn put_opaque(&mut self, namespace: &str, req: &Request) -> Result<Reply> {
        let symbol = req.arg_str(0)?;
        let format = Format::parse(req.arg_str(req.args.len() - 1)?)?;
        let payload = req.arg(req.args.len() - 2)?;
        let decoded = Self::decode_opaque_payload(payload, format)?;
        self.manager.set_opaque(namespace, symbol.to_string(), decoded);
        Ok(Reply::Ok)
    }

    /// `mput_trade`: repeated `(symbol, payload)` pairs before the final
    /// format tag, all sharing one encoding — the bulk variant of
    /// [`Self::put_opaque`] for bursts of trade prints.
    fn mput_opaque(&mut self, namespace: &str, req: &Request) -> Result<Reply> {
        if req.args.is_empty() {
            return Err(DatafeedError::BadRequest("mput_trade: missing arguments".to_string()));
        }
        let format = Format::parse(req.arg_str(req.args.len() - 1)?)?;
        let pairs = &req.args[..req.args.len() - 1];
        if pairs.len() % 2 != 0 {
            return Err(DatafeedError::BadRequest(
                "mput_trade: symbol/payload arguments must pair up".to_string(),
            ));
        }
        for chunk in pairs.chunks_exact(2) {
            let symbol = std::str::from_utf8(&chunk[0])
                .map_err(|_| DatafeedError::BadRequest("mput_trade: non-UTF-8 symbol".to_string()))?;
            let decoded = Self::decode_opaque_payload(&chunk[1], format)?;
            self.manager.set_opaque(namespace, symbol.to_string(), decoded);
        }
        Ok(Reply::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::NullProvider;
    use crate::types::TickValue;

    fn handler(dir: &std::path::Path) -> Handler {
        let manager = StoreManager::open(dir, Calendar::sh_sz()).unwrap();
        Handler::new(manager, Calendar::sh_sz(), Box::new(NullProvider), Box::new(NullProvider))
    }

    fn tmp_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("handler-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn req(command: &str, args: &[&[u8]]) -> Request {
        Request {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_vec()).collect(),
        }
    }

    #[test]
    fn unknown_command_is_bad_request() {
        let mut h = handler(&tmp_dir("unknown"));
        let reply = h.dispatch(0, &req("nonesuch", &[]));
        assert!(matches!(reply, Reply::Error(_)));
    }

    #[test]
    fn get_mtime_reflects_latest_tick() {
        let mut h = handler(&tmp_dir("mtime"));
        let mut tick = Tick::new();
        tick.insert("timestamp".to_string(), TickValue::Int(1_291_167_000));
        let blob = codec::encode_marshaled_ticks(&[("SH000001".to_string(), tick)]).unwrap();
        let reply = h.dispatch(0, &req("put_ticks", &[&blob]));
        assert_eq!(reply, Reply::Ok);

        let reply = h.dispatch(0, &req("get_mtime", &[]));
        assert_eq!(reply, Reply::Integer(1_291_167_000));
    }

    #[test]
    fn get_tick_round_trips_price_as_json() {
        let mut h = handler(&tmp_dir("get-tick"));
        let mut tick = Tick::new();
        tick.insert("timestamp".to_string(), TickValue::Int(1_291_167_000));
        tick.insert("price".to_string(), TickValue::Float(2856.99));
        let blob = codec::encode_marshaled_ticks(&[("SH000001".to_string(), tick)]).unwrap();
        h.dispatch(0, &req("put_ticks", &[&blob]));

        let reply = h.dispatch(0, &req("get_tick", &[b"SH000001", b"json"]));
        let Reply::Bulk(body) = reply else { panic!("expected bulk reply") };
        let decoded: Tick = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.get("price").unwrap().as_f64(), Some(2856.99));
    }

    #[test]
    fn get_tick_missing_symbol_is_not_exists_error() {
        let mut h = handler(&tmp_dir("missing-tick"));
        let reply = h.dispatch(0, &req("get_tick", &[b"NOPE", b"json"]));
        assert_eq!(reply, Reply::Error("Symbol NOPE not exists.".to_string()));
    }

    #[test]
    fn get_stats_tracks_dispatched_commands() {
        let mut h = handler(&tmp_dir("stats"));
        h.dispatch(0, &req("get_mtime", &[]));
        h.dispatch(0, &req("get_mtime", &[]));
        let Reply::Bulk(body) = h.dispatch(0, &req("get_stats", &[])) else {
            panic!("expected bulk reply")
        };
        let stats: Stats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats.0.get("get_mtime").unwrap().count, 2);
    }

    #[test]
    fn put_day_then_get_day_round_trips_last_row() {
        let mut h = handler(&tmp_dir("put-day"));
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let ts = h.manager.calendar().midnight(date) as i32;
        let row = Ohlc {
            time: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100.0,
            amount: 150.0,
        };
        let blob = codec::npy_encode(&[row]);
        h.dispatch(0, &req("put_day", &[b"SYM", &blob]));

        let reply = h.dispatch(0, &req("get_day", &[b"SYM", b"20200102", b"npy"]));
        let Reply::Bulk(body) = reply else { panic!("expected bulk reply") };
        let rows: Vec<Ohlc> = codec::npy_decode(&body).unwrap();
        assert_eq!(rows[0], row);
    }
}
