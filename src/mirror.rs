//! Local mirror of forecasts, measurements and sent inputs.
//!
//! [`CachedPlant`] wraps a [`Plant`] and keeps three tables in memory that
//! are updated incrementally on every [`CachedPlant::advance`] instead of
//! re-querying history:
//!
//! - `forecasts`: a rolling window of exactly `N + 1` rows starting at the
//!   current time,
//! - `measurements`: one row at initialization plus one row per step,
//! - `inputs_sent`: one row per step, `None` for inputs that were not sent.
//!
//! The tables are only rebuilt from the server on construction and on
//! [`CachedPlant::initialize`]. A forecast window that could not be rolled
//! after a step is marked stale and replaced wholesale by the next
//! successful fetch.

use tracing::{debug, warn};

use crate::control::{self, ControlInputs};
use crate::error::{BoptestError, BoptestResult};
use crate::plant::{InitParams, Plant};
use crate::points;
use crate::table::{Snapshot, Table};

#[derive(Debug, Clone)]
pub struct CachedPlant {
    plant: Plant,
    horizon_steps: usize,
    forecasts: Table,
    measurements: Table,
    inputs_sent: Table,
    forecast_stale: bool,
}

impl CachedPlant {
    /// Wraps `plant` with a forecast window of `horizon_steps` steps.
    ///
    /// # Errors
    ///
    /// `InvalidArg` for a zero horizon; any error while fetching the initial
    /// forecast or measurement rows.
    pub fn new(plant: Plant, horizon_steps: usize) -> BoptestResult<Self> {
        if horizon_steps == 0 {
            return Err(BoptestError::arg("forecast horizon must be at least one step"));
        }
        let mut cached = Self {
            plant,
            horizon_steps,
            forecasts: Table::default(),
            measurements: Table::default(),
            inputs_sent: Table::default(),
            forecast_stale: false,
        };
        cached.rebuild()?;
        Ok(cached)
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    /// Returns the wrapped plant, dropping the cached tables.
    pub fn into_inner(self) -> Plant {
        self.plant
    }

    pub fn horizon_steps(&self) -> usize {
        self.horizon_steps
    }

    /// Rolling forecast window, `horizon_steps + 1` rows.
    pub fn forecasts(&self) -> &Table {
        &self.forecasts
    }

    pub fn measurements(&self) -> &Table {
        &self.measurements
    }

    pub fn inputs_sent(&self) -> &Table {
        &self.inputs_sent
    }

    /// Whether the forecast window lags behind the plant after a failed fetch.
    pub fn is_forecast_stale(&self) -> bool {
        self.forecast_stale
    }

    /// Advances the plant and updates all three tables.
    ///
    /// The snapshot and the sent inputs are recorded as soon as the server
    /// has stepped. If the follow-up forecast fetch fails, the error is
    /// returned and the window is marked stale; the next successful fetch
    /// (from [`CachedPlant::advance`] or [`CachedPlant::refresh_forecasts`])
    /// replaces it instead of rolling it.
    pub fn advance(&mut self, u: &ControlInputs) -> BoptestResult<Snapshot> {
        let applied_at = self.plant.time();
        let snapshot = self.plant.advance(u)?;

        self.measurements.push_snapshot(&snapshot);
        let record = control::control_record(u, self.plant.input_points());
        self.inputs_sent.push_row(applied_at, &record);

        let latest = match self.fetch_forecast_window() {
            Ok(latest) => latest,
            Err(e) => {
                self.forecast_stale = true;
                warn!(time = snapshot.time, error = %e, "forecast window is stale");
                return Err(e);
            }
        };
        if self.forecast_stale {
            self.forecasts = latest;
            self.forecast_stale = false;
        } else if let Some(newest) = latest.len().checked_sub(1) {
            self.forecasts.remove_first();
            self.forecasts.push_row_from(&latest, newest);
        }

        debug!(
            time = snapshot.time,
            forecast_rows = self.forecasts.len(),
            measurement_rows = self.measurements.len(),
            "mirror advanced"
        );
        Ok(snapshot)
    }

    /// Refetches the whole forecast window at the current time without
    /// stepping.
    pub fn refresh_forecasts(&mut self) -> BoptestResult<()> {
        self.forecasts = self.fetch_forecast_window()?;
        self.forecast_stale = false;
        Ok(())
    }

    /// Re-initializes the plant and rebuilds the tables from scratch.
    pub fn initialize(&mut self, params: InitParams) -> BoptestResult<Snapshot> {
        let snapshot = self.plant.initialize(params)?;
        self.rebuild()?;
        Ok(snapshot)
    }

    /// Releases the server-side session; see [`Plant::stop`].
    pub fn stop(&self) -> BoptestResult<()> {
        self.plant.stop()
    }

    fn rebuild(&mut self) -> BoptestResult<()> {
        let now = self.plant.time();
        self.refresh_forecasts()?;
        self.measurements = self.plant.measurements(now, now)?;
        self.inputs_sent = Table::with_columns(points::names(self.plant.input_points()));
        Ok(())
    }

    fn fetch_forecast_window(&self) -> BoptestResult<Table> {
        let dt = self.plant.step();
        let table = self.plant.forecasts(self.horizon_steps as f64 * dt, dt)?;
        let expected = self.horizon_steps + 1;
        if table.len() != expected {
            return Err(BoptestError::shape(format!(
                "forecast window has {} rows, expected {expected}",
                table.len()
            )));
        }
        Ok(table)
    }
}
