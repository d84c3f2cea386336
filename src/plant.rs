//! Session lifecycle and stepping for one BOPTEST test case.
//!
//! A [`Plant`] is created by [`Plant::init_local`] (single-tenant server) or
//! [`Plant::init_service`] (multi-tenant service, which first selects a test
//! case and receives a test id). Construction sets the step, applies the
//! scenario, initializes the simulation and caches the three descriptor
//! lists. Any failure during construction is returned as an error.
//!
//! A plant mutates through `&mut self` and is not meant to be shared across
//! threads. The server enforces strict temporal ordering: each
//! [`Plant::advance`] moves time forward by exactly one step.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::control::{self, ControlInputs};
use crate::endpoint::{self, Endpoint};
use crate::error::{BoptestError, BoptestResult};
use crate::fetch::Fetcher;
use crate::kpi::KpiReport;
use crate::points::{self, PointCategory, PointDescriptor};
use crate::table::{Snapshot, Table, coerce_value};
use crate::transport::Transport;

/// Open map of server-specific scenario keys, e.g. `electricity_price`.
pub type Scenario = Map<String, Value>;

/// Scenario key that makes the server re-initialize to a predefined period.
pub const TIME_PERIOD: &str = "time_period";

/// Simulation start parameters for `/initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitParams {
    /// Simulation start time, in seconds from the beginning of the year.
    pub start_time: f64,
    /// Warmup simulated before `start_time`, in seconds.
    pub warmup_period: f64,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            warmup_period: 0.0,
        }
    }
}

/// Everything needed to bring a session to the initialized state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitOptions {
    /// Simulation start time, in seconds from the beginning of the year.
    pub start_time: f64,
    /// Warmup simulated before `start_time`, in seconds.
    pub warmup_period: f64,
    /// Control step in seconds.
    pub step: f64,
    /// Scenario applied before the simulation starts.
    pub scenario: Option<Scenario>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            warmup_period: 0.0,
            step: 900.0,
            scenario: None,
        }
    }
}

impl InitOptions {
    pub fn with_step(step: f64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// The `/initialize` part of these options.
    pub fn params(&self) -> InitParams {
        InitParams {
            start_time: self.start_time,
            warmup_period: self.warmup_period,
        }
    }
}

/// A live simulation session.
#[derive(Debug, Clone)]
pub struct Plant {
    transport: Transport,
    endpoint: Endpoint,
    testcase: String,
    step: f64,
    time: f64,
    scenario: Scenario,
    input_points: Vec<PointDescriptor>,
    measurement_points: Vec<PointDescriptor>,
    forecast_points: Vec<PointDescriptor>,
    batch_target_points: usize,
    coerce_numeric: bool,
}

impl Plant {
    /// Connects to a single-tenant server and initializes its test case.
    ///
    /// # Errors
    ///
    /// Any failure while setting the step, the scenario, initializing or
    /// loading metadata.
    pub fn init_local(config: &ClientConfig, options: &InitOptions) -> BoptestResult<Self> {
        let transport = Transport::new(config)?;
        let endpoint = Endpoint::local(&config.base_url);
        Self::establish(transport, endpoint, None, config, options)
    }

    /// Selects `testcase` on a multi-tenant service and initializes it.
    ///
    /// If anything after selection fails, the selected slot is released
    /// (best effort) before the error is returned.
    ///
    /// # Errors
    ///
    /// `Selection` if the test case is unknown or unavailable, then the same
    /// errors as [`Plant::init_local`].
    pub fn init_service(
        config: &ClientConfig,
        testcase: &str,
        options: &InitOptions,
    ) -> BoptestResult<Self> {
        let transport = Transport::new(config)?;
        let testid = select_test_case(&transport, &config.base_url, testcase)?;
        let endpoint = Endpoint::service(&config.base_url, testid);

        match Self::establish(
            transport.clone(),
            endpoint.clone(),
            Some(testcase),
            config,
            options,
        ) {
            Ok(plant) => Ok(plant),
            Err(e) => {
                warn!(%endpoint, error = %e, "session setup failed, releasing test case");
                if let Err(stop_err) = stop_endpoint(&transport, &endpoint) {
                    warn!(%endpoint, error = %stop_err, "could not release test case");
                }
                Err(e)
            }
        }
    }

    fn establish(
        transport: Transport,
        endpoint: Endpoint,
        testcase: Option<&str>,
        config: &ClientConfig,
        options: &InitOptions,
    ) -> BoptestResult<Self> {
        let mut plant = Self {
            transport,
            endpoint,
            testcase: testcase.unwrap_or_default().to_string(),
            step: options.step,
            time: options.start_time,
            scenario: Scenario::new(),
            input_points: Vec::new(),
            measurement_points: Vec::new(),
            forecast_points: Vec::new(),
            batch_target_points: config.batch_target_points,
            coerce_numeric: config.coerce_numeric,
        };

        plant.set_step(options.step)?;

        let scenario_initializes = options
            .scenario
            .as_ref()
            .is_some_and(|s| s.contains_key(TIME_PERIOD));
        if let Some(scenario) = &options.scenario {
            plant.set_scenario(scenario.clone())?;
        }
        if !scenario_initializes {
            plant.initialize(options.params())?;
        }

        plant.input_points = plant.list_points(PointCategory::Inputs)?;
        plant.measurement_points = plant.list_points(PointCategory::Measurements)?;
        plant.forecast_points = plant.list_points(PointCategory::Forecast)?;
        if plant.testcase.is_empty() {
            plant.testcase = plant.name()?;
        }

        info!(
            testcase = %plant.testcase,
            endpoint = %plant.endpoint,
            step = plant.step,
            time = plant.time,
            "session initialized"
        );
        Ok(plant)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn testcase(&self) -> &str {
        &self.testcase
    }

    /// Control step in seconds, as last set by this client.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Simulation time in seconds, as last reported by the server.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Scenario as last confirmed by the server.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn input_points(&self) -> &[PointDescriptor] {
        &self.input_points
    }

    pub fn measurement_points(&self) -> &[PointDescriptor] {
        &self.measurement_points
    }

    pub fn forecast_points(&self) -> &[PointDescriptor] {
        &self.forecast_points
    }

    /// (Re)initializes the simulation at `params.start_time`.
    ///
    /// Returns the measurement snapshot at the new start time. If the server
    /// sends no usable snapshot, one stamped with `start_time` and no values
    /// is returned instead.
    ///
    /// # Errors
    ///
    /// `Initialization` on a non-2xx reply.
    pub fn initialize(&mut self, params: InitParams) -> BoptestResult<Snapshot> {
        let url = self.endpoint.url("initialize");
        let body = serde_json::to_value(params)
            .map_err(|e| BoptestError::arg(format!("initialization parameters: {e}")))?;
        let reply = self.transport.put(&url, Some(&body))?;
        if !reply.is_success() {
            return Err(BoptestError::Initialization {
                status: reply.status,
                message: reply.message(),
            });
        }
        let snapshot = match reply
            .into_payload("PUT", &url)
            .and_then(|payload| Snapshot::from_payload(&payload))
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, start_time = params.start_time, "initialize reply has no snapshot");
                Snapshot {
                    time: params.start_time,
                    values: Default::default(),
                }
            }
        };
        self.time = snapshot.time;
        debug!(time = self.time, "simulation initialized");
        Ok(snapshot)
    }

    /// Sets the control step in seconds.
    ///
    /// # Errors
    ///
    /// `InvalidArg` for a non-finite or non-positive step, `StepConfig` on a
    /// non-2xx reply.
    pub fn set_step(&mut self, step: f64) -> BoptestResult<()> {
        if !step.is_finite() || step <= 0.0 {
            return Err(BoptestError::arg(format!("step must be > 0, got {step}")));
        }
        let url = self.endpoint.url("step");
        let reply = self.transport.put(&url, Some(&json!({ "step": step })))?;
        if !reply.is_success() {
            return Err(BoptestError::StepConfig {
                status: reply.status,
                message: reply.message(),
            });
        }
        self.step = step;
        Ok(())
    }

    /// Reads the control step back from the server.
    pub fn fetch_step(&self) -> BoptestResult<f64> {
        let url = self.endpoint.url("step");
        let payload = self.transport.get(&url)?.into_payload("GET", &url)?;
        coerce_value(&payload)
            .ok()
            .flatten()
            .ok_or_else(|| BoptestError::shape(format!("step payload is not a number: {payload}")))
    }

    /// Applies a scenario and returns it as confirmed by the server.
    ///
    /// A scenario with a `time_period` re-initializes the simulation; the
    /// tracked time then follows the server's reply.
    pub fn set_scenario(&mut self, scenario: Scenario) -> BoptestResult<Scenario> {
        let url = self.endpoint.url("scenario");
        let payload = self
            .transport
            .put(&url, Some(&Value::Object(scenario)))?
            .into_payload("PUT", &url)?;
        if let Some(snapshot) = payload
            .get(TIME_PERIOD)
            .and_then(|v| Snapshot::from_payload(v).ok())
        {
            self.time = snapshot.time;
        }
        let confirmed = self.fetch_scenario()?;
        self.scenario = confirmed.clone();
        Ok(confirmed)
    }

    /// Reads the active scenario from the server.
    pub fn fetch_scenario(&self) -> BoptestResult<Scenario> {
        let url = self.endpoint.url("scenario");
        match self.transport.get(&url)?.into_payload("GET", &url)? {
            Value::Object(map) => Ok(map),
            other => Err(BoptestError::shape(format!(
                "scenario payload is not an object: {other}"
            ))),
        }
    }

    /// Queries one descriptor list from the server.
    ///
    /// The plant already caches all three lists; this always hits the network.
    pub fn list_points(&self, category: PointCategory) -> BoptestResult<Vec<PointDescriptor>> {
        let url = self.endpoint.url(category.service());
        let payload = self.transport.get(&url)?.into_payload("GET", &url)?;
        points::parse_points(&payload)
    }

    /// History of all measurement points over `[start, end]`.
    pub fn measurements(&self, start: f64, end: f64) -> BoptestResult<Table> {
        self.series(&points::names(&self.measurement_points), start, end)
    }

    /// History of the named points over `[start, end]`, batched as needed.
    pub fn series(&self, points: &[String], start: f64, end: f64) -> BoptestResult<Table> {
        self.fetcher().series(points, start, end)
    }

    /// Forecasts of all forecast points from now over `horizon` seconds.
    pub fn forecasts(&self, horizon: f64, interval: f64) -> BoptestResult<Table> {
        self.forecast(&points::names(&self.forecast_points), horizon, interval)
    }

    /// Forecasts of the named points from now over `horizon` seconds.
    pub fn forecast(&self, points: &[String], horizon: f64, interval: f64) -> BoptestResult<Table> {
        self.fetcher().forecast(points, horizon, interval)
    }

    /// Advances the simulation by one step with the given control inputs.
    ///
    /// This is the only call that may be retried (see
    /// [`RetryPolicy`](crate::config::RetryPolicy)). If a first attempt was
    /// applied by the server but its response was lost, a successful retry
    /// advances the simulation twice.
    ///
    /// # Errors
    ///
    /// `InvalidControl` if `u` names anything but declared `_u`/`_activate`
    /// inputs; transport, status and shape errors otherwise.
    pub fn advance(&mut self, u: &ControlInputs) -> BoptestResult<Snapshot> {
        control::validate(u, &self.input_points)?;
        let url = self.endpoint.url("advance");
        let body = serde_json::to_value(u)
            .map_err(|e| BoptestError::arg(format!("control inputs: {e}")))?;
        let payload = self
            .transport
            .post_with_retry(&url, &body)?
            .into_payload("POST", &url)?;
        let snapshot = Snapshot::from_payload(&payload)?;
        self.time = snapshot.time;
        Ok(snapshot)
    }

    pub fn kpi(&self) -> BoptestResult<KpiReport> {
        let url = self.endpoint.url("kpi");
        let payload = self.transport.get(&url)?.into_payload("GET", &url)?;
        KpiReport::from_payload(&payload)
    }

    /// Name of the running test case, as reported by the server.
    pub fn name(&self) -> BoptestResult<String> {
        let url = self.endpoint.url("name");
        let payload = self.transport.get(&url)?.into_payload("GET", &url)?;
        string_field(&payload, "name")
    }

    /// BOPTEST version of the server.
    pub fn version(&self) -> BoptestResult<String> {
        let url = self.endpoint.root_url("version");
        let payload = self.transport.get(&url)?.into_payload("GET", &url)?;
        string_field(&payload, "version")
    }

    /// Releases the server-side simulation slot.
    ///
    /// For a local server this sends nothing. A service that refuses the stop
    /// is logged and ignored so teardown never fails the caller.
    ///
    /// # Errors
    ///
    /// Only transport errors (no reply at all) are returned.
    pub fn stop(&self) -> BoptestResult<()> {
        match &self.endpoint {
            Endpoint::Local { .. } => {
                debug!("stop on a local server is a no-op");
                Ok(())
            }
            Endpoint::Service { .. } => stop_endpoint(&self.transport, &self.endpoint),
        }
    }

    fn fetcher(&self) -> Fetcher<'_> {
        Fetcher {
            transport: &self.transport,
            endpoint: &self.endpoint,
            step: self.step,
            batch_target_points: self.batch_target_points,
            coerce_numeric: self.coerce_numeric,
        }
    }
}

/// Selects a test case on a service deployment and returns its test id.
///
/// # Errors
///
/// `Selection` on a non-200 reply, `DataShape` if no test id is returned.
pub fn select_test_case(
    transport: &Transport,
    base_url: &str,
    testcase: &str,
) -> BoptestResult<String> {
    let url = endpoint::select_url(base_url, testcase);
    let reply = transport.post(&url, &json!({}))?;
    if reply.status != 200 {
        return Err(BoptestError::Selection {
            testcase: testcase.to_string(),
            status: reply.status,
            message: reply.message(),
        });
    }
    let testid = reply
        .body
        .get("testid")
        .or_else(|| reply.body.get("payload").and_then(|p| p.get("testid")))
        .and_then(Value::as_str)
        .ok_or_else(|| BoptestError::shape(format!("selection of `{testcase}` returned no testid")))?
        .to_string();
    info!(testcase, testid = %testid, "test case selected");
    Ok(testid)
}

/// Lists the test cases a service deployment offers.
pub fn list_test_cases(config: &ClientConfig) -> BoptestResult<Vec<String>> {
    let transport = Transport::new(config)?;
    let url = endpoint::testcases_url(&config.base_url);
    let reply = transport.get(&url)?;
    let enveloped = reply.body.get("payload").is_some();
    let body = if enveloped || !reply.is_success() {
        reply.into_payload("GET", &url)?
    } else {
        reply.body
    };
    let entries = body
        .as_array()
        .ok_or_else(|| BoptestError::shape("test case list is not an array"))?;
    entries
        .iter()
        .map(|e| {
            e.as_str()
                .or_else(|| e.get("testcaseid").and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| BoptestError::shape(format!("unrecognized test case entry: {e}")))
        })
        .collect()
}

fn stop_endpoint(transport: &Transport, endpoint: &Endpoint) -> BoptestResult<()> {
    let reply = transport.put(&endpoint.url("stop"), None)?;
    if reply.is_success() {
        info!(%endpoint, "session stopped");
    } else {
        warn!(
            %endpoint,
            status = reply.status,
            message = %reply.message(),
            "server refused to stop session"
        );
    }
    Ok(())
}

fn string_field(payload: &Value, key: &str) -> BoptestResult<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
        .map(str::to_string)
        .ok_or_else(|| BoptestError::shape(format!("payload has no `{key}` string")))
}
