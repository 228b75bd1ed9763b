//! Cumulative-counter to daily-delta reconstruction.
//!
//! The marketplace reports "total orders ever placed" per SKU. The counter
//! is supposed to be non-decreasing but occasionally resets or jumps.
//! This module turns the time-ordered snapshot sequence of one
//! (product, sku) into a dense per-day series of order deltas and revenue
//! without ever emitting a negative delta.
//!
//! Everything here is pure and storage-agnostic so the correction rules can
//! be tested exhaustively.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::entities::ProductSnapshot;

/// One reconstructed day for one (product, sku).
///
/// Derived on demand from snapshots, never persisted as primary data, so
/// aggregation stays idempotent and replayable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDelta {
    pub product_id: i64,
    pub sku_id: i64,
    pub date: NaiveDate,
    pub order_delta: i64,
    pub revenue: f64,
    /// Stock from the day's last snapshot, carried forward over gaps.
    pub available_stock: i64,
    /// Running count of days the SKU had stock, from the first observation.
    pub days_in_stock_so_far: u32,
}

/// All snapshots of one calendar day collapsed to the values the
/// reconstruction needs.
#[derive(Debug, Clone, PartialEq)]
struct DayObservation {
    date: NaiveDate,
    min_count: i64,
    max_count: i64,
    median_price: f64,
    last_stock: i64,
}

/// Group snapshots by calendar day. Sorts defensively; upstream ordering is
/// not trusted.
fn collapse_days(snapshots: &[ProductSnapshot]) -> Vec<DayObservation> {
    let mut sorted: Vec<&ProductSnapshot> = snapshots.iter().collect();
    sorted.sort_by_key(|s| s.observed_at);

    let mut days: Vec<DayObservation> = Vec::new();
    let mut day_prices: Vec<f64> = Vec::new();

    for snap in sorted {
        let date = snap.day();
        match days.last_mut() {
            Some(day) if day.date == date => {
                day.min_count = day.min_count.min(snap.cumulative_order_count);
                day.max_count = day.max_count.max(snap.cumulative_order_count);
                day.last_stock = snap.available_stock;
                day_prices.push(snap.price);
                day.median_price = median(&mut day_prices);
            }
            _ => {
                day_prices.clear();
                day_prices.push(snap.price);
                days.push(DayObservation {
                    date,
                    min_count: snap.cumulative_order_count,
                    max_count: snap.cumulative_order_count,
                    median_price: snap.price,
                    last_stock: snap.available_stock,
                });
            }
        }
    }
    days
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Delta for one observed day given the previous observed day's state.
///
/// The normal path is `raw = curr_max - prev_max` when the counter moved
/// forward or stayed put. Correction only engages when `raw` is negative,
/// evaluated in order:
///
/// 1. today's max below yesterday's whole delta (reset between samples):
///    `raw - (prev_delta - curr_max)`
/// 2. `prev_delta - curr_max >= 0` and the counter never dropped below
///    today's min: `raw + (prev_delta - curr_max)`
/// 3. `prev_delta > 0` and `curr_max > prev_delta`:
///    `raw + (curr_max - prev_delta)`
/// 4. otherwise `raw`
///
/// followed by a clamp to zero: orders are never negative, and an
/// uncorrectable anomaly reports zero rather than pushing a corrupted
/// negative into revenue sums.
fn corrected_delta(prev_max: i64, prev_delta: i64, day: &DayObservation) -> i64 {
    let raw = day.max_count - prev_max;
    if raw >= 0 {
        return raw;
    }

    let delta = if day.max_count < prev_delta {
        raw - (prev_delta - day.max_count)
    } else if prev_delta - day.max_count >= 0 && day.min_count >= prev_max {
        raw + (prev_delta - day.max_count)
    } else if prev_delta > 0 && day.max_count > prev_delta {
        raw + (day.max_count - prev_delta)
    } else {
        raw
    };

    delta.max(0)
}

/// Reconstruct the dense daily series from the first to the last observed
/// calendar day. The first observed day is the baseline and contributes a
/// zero delta. Days without a snapshot get a zero delta with stock carried
/// forward, so the series always has exactly one entry per day in range.
///
/// Never fails: a corrupt snapshot degrades to a zero delta, it must not
/// block aggregation of the rest of the series.
pub fn reconstruct_daily(snapshots: &[ProductSnapshot]) -> Vec<DailyDelta> {
    let days = collapse_days(snapshots);
    let Some(first) = days.first() else {
        return Vec::new();
    };
    let last_date = days.last().map(|d| d.date).unwrap_or(first.date);
    let (product_id, sku_id) = (snapshots[0].product_id, snapshots[0].sku_id);

    let mut series = Vec::new();
    let mut day_iter = days.iter().peekable();

    let mut prev_max = 0i64;
    let mut prev_delta = 0i64;
    let mut carried_stock = 0i64;
    let mut days_in_stock = 0u32;
    let mut seen_first = false;

    let mut date = first.date;
    while date <= last_date {
        let (order_delta, revenue) = match day_iter.peek() {
            Some(day) if day.date == date => {
                let day = day_iter.next().expect("peeked");
                let delta = if seen_first {
                    corrected_delta(prev_max, prev_delta, day)
                } else {
                    seen_first = true;
                    0
                };
                prev_max = day.max_count;
                prev_delta = delta;
                carried_stock = day.last_stock;
                (delta, delta as f64 * day.median_price)
            }
            _ => {
                prev_delta = 0;
                (0, 0.0)
            }
        };

        if carried_stock > 0 {
            days_in_stock += 1;
        }
        series.push(DailyDelta {
            product_id,
            sku_id,
            date,
            order_delta,
            revenue,
            available_stock: carried_stock,
            days_in_stock_so_far: days_in_stock,
        });
        date += Duration::days(1);
    }
    series
}

/// Dense series over an explicit `[from, to]` range (inclusive).
///
/// Days before the first observation report zero delta and zero stock; days
/// after the last observation carry the last known stock forward. Returns
/// an empty vec when there are no snapshots at all, so callers can tell
/// "no data collected yet" apart from "no sales".
pub fn reconstruct_range(
    snapshots: &[ProductSnapshot],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<DailyDelta> {
    if snapshots.is_empty() || from > to {
        return Vec::new();
    }
    let full = reconstruct_daily(snapshots);
    let (product_id, sku_id) = (snapshots[0].product_id, snapshots[0].sku_id);
    let first = full.first().expect("non-empty input").clone();
    let last = full.last().expect("non-empty input").clone();

    let mut series = Vec::new();
    let mut date = from;
    let mut tail_days_in_stock = last.days_in_stock_so_far;
    while date <= to {
        let entry = if date < first.date {
            DailyDelta {
                product_id,
                sku_id,
                date,
                order_delta: 0,
                revenue: 0.0,
                available_stock: 0,
                days_in_stock_so_far: 0,
            }
        } else if date > last.date {
            if last.available_stock > 0 {
                tail_days_in_stock += 1;
            }
            DailyDelta {
                product_id,
                sku_id,
                date,
                order_delta: 0,
                revenue: 0.0,
                available_stock: last.available_stock,
                days_in_stock_so_far: tail_days_in_stock,
            }
        } else {
            let idx = (date - first.date).num_days() as usize;
            full[idx].clone()
        };
        series.push(entry);
        date += Duration::days(1);
    }
    series
}
