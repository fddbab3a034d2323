//! Dividend-adjustment math over a day-OHLC slice (§3 of SPEC_FULL.md).
//!
//! Grounded in `original_source/datafeed/dividend.py`'s `Dividend.adjust`/
//! `_divide`/`_split`, which back-adjust a pandas `DataFrame` of daily OHLCs
//! in place for every dividend/split event whose ex-date falls after the
//! frame's first row. Here the same two-pass algorithm is a pure function
//! over a `&[Ohlc]` slice rather than a `DataFrame` column mutation — dividend-
//! adjustment math is named an external collaborator in spec.md §1, so this
//! is offered as a library-level utility, not wired into any wire command.
//!
//! Rows must be in ascending `time` order; dividends are applied in the
//! order given (matching the original's `for div in dividends: d.adjust(y)`
//! loop, with no internal re-sort).

use crate::types::{Dividend, Ohlc};

/// Unix-seconds day index, used only to compare "which calendar day is
/// this row on" without pulling in a timezone (the adjustment math is pure
/// and doesn't care what timezone a session boundary falls in).
fn day_index(unix_seconds: i32) -> i32 {
    unix_seconds.div_euclid(86_400)
}

/// Net cash paid out per share after this event, per `dividend.py`'s
/// `cash_afterward` property.
fn cash_afterward(div: &Dividend) -> f64 {
    div.dividend as f64 - div.purchase as f64 * div.purchase_price as f64
}

/// Share-count multiplier this event implies, per `dividend.py`'s
/// `share_afterward` property (`1.0` means no split).
fn share_afterward(div: &Dividend) -> f64 {
    1.0 + div.purchase as f64 + div.split as f64
}

/// Back-adjust each row's close price for every dividend/split event in
/// `dividends`, applied in order.
///
/// For each event whose ex-date falls after `rows`' first row: rows
/// strictly before the ex-date have `cash_afterward` subtracted (the
/// `_divide` pass), then are divided by `share_afterward` (the `_split`
/// pass); rows on or after the ex-date are left untouched by that event,
/// matching the original's backfill-reindex semantics where post-ex-date
/// targets pick up the trailing zero/one sentinel.
pub fn adjust_close(rows: &[Ohlc], dividends: &[Dividend]) -> Vec<f32> {
    let mut adjusted: Vec<f64> = rows.iter().map(|r| r.close as f64).collect();
    let Some(first) = rows.first() else {
        return adjusted.into_iter().map(|v| v as f32).collect();
    };
    let first_day = day_index(first.time);

    for div in dividends {
        let ex_day = day_index(div.time);
        if ex_day <= first_day {
            continue;
        }

        let cash = cash_afterward(div);
        if cash != 0.0 {
            for (row, value) in rows.iter().zip(adjusted.iter_mut()) {
                if day_index(row.time) < ex_day {
                    *value -= cash;
                }
            }
        }

        let shares = share_afterward(div);
        if shares != 1.0 {
            for (row, value) in rows.iter().zip(adjusted.iter_mut()) {
                if day_index(row.time) < ex_day {
                    *value /= shares;
                }
            }
        }
    }

    adjusted.into_iter().map(|v| v as f32).collect()
}

/// Back-adjust each row's volume for every split event in `dividends`.
///
/// The original only ever touches `adjclose`; this is an extension in the
/// same spirit (a stock that split 2:1 traded half as many pre-split
/// shares for the same notional volume, so historical volume scales by
/// `share_afterward`, the inverse of the price adjustment).
pub fn adjust_volume(rows: &[Ohlc], dividends: &[Dividend]) -> Vec<f32> {
    let mut adjusted: Vec<f64> = rows.iter().map(|r| r.volume as f64).collect();
    let Some(first) = rows.first() else {
        return adjusted.into_iter().map(|v| v as f32).collect();
    };
    let first_day = day_index(first.time);

    for div in dividends {
        let ex_day = day_index(div.time);
        if ex_day <= first_day {
            continue;
        }
        let shares = share_afterward(div);
        if shares == 1.0 {
            continue;
        }
        for (row, value) in rows.iter().zip(adjusted.iter_mut()) {
            if day_index(row.time) < ex_day {
                *value *= shares;
            }
        }
    }

    adjusted.into_iter().map(|v| v as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc_on_day(day: i32, close: f32) -> Ohlc {
        Ohlc {
            time: day * 86_400,
            open: close,
            high: close,
            low: close,
            close,
            volume: 675_114.0,
            amount: 758_148_608.0,
        }
    }

    fn dividend_on_day(day: i32, split: f32, dividend: f32) -> Dividend {
        Dividend {
            time: day * 86_400,
            split,
            purchase: 0.0,
            purchase_price: 0.0,
            dividend,
        }
    }

    fn close_enough(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.05
    }

    /// Mirrors `DividendTest.test_adjust_divide_or_split`: a 2:1 split on
    /// day 5 then an $0.08 cash dividend on day 6.
    #[test]
    fn split_then_cash_dividend_back_adjusts_earlier_closes() {
        let rows = [
            ohlc_on_day(1, 46.99),
            ohlc_on_day(2, 48.30),
            ohlc_on_day(5, 24.96),
            ohlc_on_day(6, 24.53),
        ];
        let dividends = [dividend_on_day(5, 1.0, 0.0), dividend_on_day(6, 0.0, 0.08)];

        let adjusted = adjust_close(&rows, &dividends);

        assert!(close_enough(adjusted[0], 23.42), "{}", adjusted[0]);
        assert!(close_enough(adjusted[1], 24.07), "{}", adjusted[1]);
        assert!(close_enough(adjusted[2], 24.88), "{}", adjusted[2]);
        assert!(close_enough(adjusted[3], 24.53), "{}", adjusted[3]);
    }

    #[test]
    fn dividend_at_or_before_first_row_is_a_no_op() {
        let rows = [ohlc_on_day(10, 10.0)];
        let dividends = [dividend_on_day(10, 0.0, 1.0), dividend_on_day(5, 0.0, 1.0)];
        let adjusted = adjust_close(&rows, &dividends);
        assert_eq!(adjusted[0], 10.0);
    }

    #[test]
    fn split_scales_volume_by_share_afterward() {
        let rows = [ohlc_on_day(1, 10.0), ohlc_on_day(5, 10.0)];
        let dividends = [dividend_on_day(3, 1.0, 0.0)]; // 2:1 split
        let adjusted = adjust_volume(&rows, &dividends);
        assert!(close_enough(adjusted[0], 675_114.0 * 2.0));
        assert!(close_enough(adjusted[1], 675_114.0));
    }
}
