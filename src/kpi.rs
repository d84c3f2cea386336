//! Server-computed key performance indicators.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{BoptestError, BoptestResult};
use crate::table::coerce_value;

/// KPI values reported by the server for the elapsed simulation.
///
/// KPIs the test case does not compute (e.g. gas power for an all-electric
/// building) are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KpiReport {
    pub values: BTreeMap<String, Option<f64>>,
}

impl KpiReport {
    /// Parses the `/kpi` payload.
    ///
    /// # Errors
    ///
    /// Returns `DataShape` if the payload is not a JSON object.
    pub fn from_payload(payload: &Value) -> BoptestResult<Self> {
        let map = payload
            .as_object()
            .ok_or_else(|| BoptestError::shape("kpi payload is not a JSON object"))?;
        let values = map
            .iter()
            .map(|(k, v)| (k.clone(), coerce_value(v).ok().flatten()))
            .collect();
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    /// Thermal discomfort (K h / zone).
    pub fn thermal_discomfort(&self) -> Option<f64> {
        self.get("tdis_tot")
    }

    /// Indoor air quality discomfort (ppm h / zone).
    pub fn iaq_discomfort(&self) -> Option<f64> {
        self.get("idis_tot")
    }

    /// Energy use (kWh / m²).
    pub fn energy(&self) -> Option<f64> {
        self.get("ener_tot")
    }

    /// Operational cost (currency / m²).
    pub fn cost(&self) -> Option<f64> {
        self.get("cost_tot")
    }

    /// CO2 emissions (kgCO2 / m²).
    pub fn emissions(&self) -> Option<f64> {
        self.get("emis_tot")
    }

    /// Peak electrical demand (kW / m²).
    pub fn peak_electricity(&self) -> Option<f64> {
        self.get("pele_tot")
    }

    /// Peak gas demand (kW / m²).
    pub fn peak_gas(&self) -> Option<f64> {
        self.get("pgas_tot")
    }

    /// Peak district heating demand (kW / m²).
    pub fn peak_district_heating(&self) -> Option<f64> {
        self.get("pdih_tot")
    }

    /// Computational time ratio (s / simulated s).
    pub fn time_ratio(&self) -> Option<f64> {
        self.get("time_rat")
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |x| format!("{x:.4}"));
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Thermal discomfort:    {} Kh/zone", fmt_opt(self.thermal_discomfort()))?;
        writeln!(f, "IAQ discomfort:        {} ppmh/zone", fmt_opt(self.iaq_discomfort()))?;
        writeln!(f, "Energy use:            {} kWh/m2", fmt_opt(self.energy()))?;
        writeln!(f, "Operational cost:      {} /m2", fmt_opt(self.cost()))?;
        writeln!(f, "Emissions:             {} kgCO2/m2", fmt_opt(self.emissions()))?;
        writeln!(f, "Peak electricity:      {} kW/m2", fmt_opt(self.peak_electricity()))?;
        writeln!(f, "Peak gas:              {} kW/m2", fmt_opt(self.peak_gas()))?;
        writeln!(f, "Peak district heating: {} kW/m2", fmt_opt(self.peak_district_heating()))?;
        write!(f, "Time ratio:            {}", fmt_opt(self.time_ratio()))
    }
}
