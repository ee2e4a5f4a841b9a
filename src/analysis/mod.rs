//! Read-only statistics derived from location samples. Nothing here is persisted.
//!
//! "Time spent" is the span between the first and the last sample of the day. It's a rough
//! session-span heuristic, not true dwell time: gaps without samples still count.

pub mod dashboard;

use chrono::{Duration, NaiveDate, TimeZone};

use crate::{store::entities::LocationSample, utils::time::is_on_date};

/// Decimal places kept when bucketing coordinates. Three places make roughly 100 m cells.
const CELL_PRECISION: f64 = 1000.;

/// Cell a coordinate falls into, used to count distinct locations.
pub fn location_cell(latitude: f64, longitude: f64) -> (i64, i64) {
    (
        (latitude * CELL_PRECISION).round() as i64,
        (longitude * CELL_PRECISION).round() as i64,
    )
}

fn samples_on<'a, Tz: TimeZone>(
    samples: impl IntoIterator<Item = &'a LocationSample>,
    date: NaiveDate,
    tz: &Tz,
) -> Vec<&'a LocationSample> {
    samples
        .into_iter()
        .filter(|v| is_on_date(v.timestamp, date, tz))
        .collect()
}

/// Span between the earliest and the latest sample taken on `date`. Zero with fewer than two.
pub fn time_spent_on<'a, Tz: TimeZone>(
    samples: impl IntoIterator<Item = &'a LocationSample>,
    date: NaiveDate,
    tz: &Tz,
) -> Duration {
    let on_date = samples_on(samples, date, tz);
    let earliest = on_date.iter().map(|v| v.timestamp).min();
    let latest = on_date.iter().map(|v| v.timestamp).max();
    match (earliest, latest) {
        (Some(earliest), Some(latest)) => latest - earliest,
        _ => Duration::zero(),
    }
}

/// Number of distinct ~100 m cells visited on `date`.
pub fn distinct_locations_on<'a, Tz: TimeZone>(
    samples: impl IntoIterator<Item = &'a LocationSample>,
    date: NaiveDate,
    tz: &Tz,
) -> usize {
    let mut cells = samples_on(samples, date, tz)
        .into_iter()
        .map(|v| location_cell(v.latitude, v.longitude))
        .collect::<Vec<_>>();
    cells.sort_unstable();
    cells.dedup();
    cells.len()
}
