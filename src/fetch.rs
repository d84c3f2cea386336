//! Time-series retrieval with transparent batching.
//!
//! The server caps how many points one `/results` call may return, so a long
//! history request is split into windows whose size keeps each reply below
//! `batch_target_points` (samples x signals). The replies are stitched into
//! one table ordered by time.

use serde_json::json;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{BoptestError, BoptestResult};
use crate::table::Table;
use crate::transport::Transport;

/// Native output resolution of the server; finer steps do not add samples.
pub const MAX_SAMPLE_INTERVAL: f64 = 30.0;

/// Length in seconds of one `/results` window.
///
/// # Arguments
///
/// * `n_points` - Number of signals requested
/// * `batch_target_points` - Target number of values per request
/// * `step` - Control step of the session, in seconds
pub fn batch_window_length(n_points: usize, batch_target_points: usize, step: f64) -> f64 {
    let samples = (batch_target_points / n_points.max(1)).max(1);
    samples as f64 * step.min(MAX_SAMPLE_INTERVAL)
}

/// Splits `[start, end]` into consecutive windows of at most `window` seconds.
///
/// Adjacent windows share their boundary. The last window ends exactly at
/// `end`. A zero-length range yields the single window `(start, start)`.
///
/// # Errors
///
/// Returns `InvalidArg` for non-finite bounds, `end < start`, or a
/// non-positive window.
pub fn batch_windows(start: f64, end: f64, window: f64) -> BoptestResult<Vec<(f64, f64)>> {
    if !start.is_finite() || !end.is_finite() {
        return Err(BoptestError::arg("time bounds must be finite"));
    }
    if end < start {
        return Err(BoptestError::arg(format!(
            "end time {end} is before start time {start}"
        )));
    }
    if !window.is_finite() || window <= 0.0 {
        return Err(BoptestError::arg("batch window must be > 0"));
    }
    if end == start {
        return Ok(vec![(start, start)]);
    }

    let mut windows = Vec::new();
    let mut lo = start;
    let mut k = 1.0;
    while lo < end {
        let hi = (start + k * window).min(end);
        windows.push((lo, hi));
        lo = hi;
        k += 1.0;
    }
    Ok(windows)
}

/// Issues `/results` and `/forecast` requests for one session.
#[derive(Debug, Clone, Copy)]
pub struct Fetcher<'a> {
    pub transport: &'a Transport,
    pub endpoint: &'a Endpoint,
    /// Control step of the session, in seconds.
    pub step: f64,
    pub batch_target_points: usize,
    pub coerce_numeric: bool,
}

impl Fetcher<'_> {
    /// Fetches stored trajectories of `points` over `[start, end]`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` for an empty point list or invalid bounds; transport and
    /// shape errors from any batch abort the whole fetch.
    pub fn series(&self, points: &[String], start: f64, end: f64) -> BoptestResult<Table> {
        if points.is_empty() {
            return Err(BoptestError::arg("no points requested"));
        }
        let window = batch_window_length(points.len(), self.batch_target_points, self.step);
        let windows = batch_windows(start, end, window)?;
        debug!(
            points = points.len(),
            start,
            end,
            batches = windows.len(),
            "fetching results"
        );

        let url = self.endpoint.url("results");
        let mut tables = Vec::with_capacity(windows.len());
        for (lo, hi) in windows {
            let body = json!({
                "point_names": points,
                "start_time": lo,
                "final_time": hi,
            });
            let payload = self.transport.put(&url, Some(&body))?.into_payload("PUT", &url)?;
            tables.push(Table::from_payload(&payload)?);
        }

        let mut table = Table::concat(tables);
        table.sort_dedup_by_time();
        Ok(self.finish(table))
    }

    /// Fetches forecasts of `points` from the current time over `horizon`
    /// seconds at `interval` spacing.
    ///
    /// # Errors
    ///
    /// `InvalidArg` for an empty point list or a non-positive interval.
    pub fn forecast(&self, points: &[String], horizon: f64, interval: f64) -> BoptestResult<Table> {
        if points.is_empty() {
            return Err(BoptestError::arg("no points requested"));
        }
        if !interval.is_finite() || interval <= 0.0 || !horizon.is_finite() || horizon < 0.0 {
            return Err(BoptestError::arg(format!(
                "invalid forecast horizon {horizon} / interval {interval}"
            )));
        }
        let url = self.endpoint.url("forecast");
        let body = json!({
            "point_names": points,
            "horizon": horizon,
            "interval": interval,
        });
        let payload = self.transport.put(&url, Some(&body))?.into_payload("PUT", &url)?;
        let mut table = Table::from_payload(&payload)?;
        table.sort_dedup_by_time();
        Ok(self.finish(table))
    }

    fn finish(&self, mut table: Table) -> Table {
        if self.coerce_numeric {
            for w in table.coerce_numeric() {
                warn!(column = %w.column, reason = %w.reason, "numeric coercion failed");
            }
        }
        table
    }
}
