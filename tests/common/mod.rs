//! In-process mock BOPTEST server shared by the integration tests.
//!
//! Serves both URL layouts: `/<service>` (single-tenant) and
//! `/<service>/<testid>` (service deployment). Signals are deterministic
//! functions of simulation time, so a history query returns the same values
//! no matter how it is batched.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::f64::consts::PI;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, get, on, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use boptest_client::{ClientConfig, InitOptions};

pub const TESTCASE: &str = "bestest_hydronic";
pub const SAMPLE_INTERVAL: f64 = 30.0;
pub const MEASUREMENTS: &[&str] = &["reaPHeaPum_y", "reaTZon_y", "weaSta_reaWeaTDryBul_y"];
pub const INPUTS: &[&str] = &["ovePum_activate", "ovePum_u", "oveTSet_activate", "oveTSet_u"];
pub const FORECASTS: &[&str] = &["LowerSetp[1]", "TDryBul", "UpperSetp[1]"];
/// Results-only signal whose values are text.
pub const MODE_POINT: &str = "opeMod_y";
/// Start time the `peak_heat_day` scenario jumps to.
pub const PEAK_HEAT_DAY_START: f64 = 1_382_400.0;

pub type Shared = Arc<Mutex<MockState>>;

type Reply = (StatusCode, Json<Value>);
type Op = fn(&mut MockState, Option<&str>, Value) -> Reply;

/// Mutable simulation state of the mock server.
#[derive(Debug)]
pub struct MockState {
    pub time: f64,
    pub step: f64,
    pub scenario: Map<String, Value>,
    pub sessions: BTreeSet<String>,
    pub next_testid: u32,
    /// Largest `samples x signals` one `/results` call may return.
    pub max_points_per_request: usize,
    /// "METHOD /path" of every request, in arrival order.
    pub requests: Vec<String>,
    /// Status codes returned by upcoming `/advance` calls without stepping.
    pub advance_failures: VecDeque<u16>,
    pub advance_count: usize,
    pub last_inputs: Map<String, Value>,
    /// Status codes returned by upcoming `/forecast` calls.
    pub forecast_failures: VecDeque<u16>,
    /// Latency added to upcoming `/advance` replies, applied after stepping.
    pub advance_delays: VecDeque<Duration>,
    /// Artificial latency added to `/kpi` replies.
    pub kpi_delay: Duration,
    /// Answer `/initialize` with a status-only envelope.
    pub initialize_without_snapshot: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            time: 0.0,
            step: 3600.0,
            scenario: Map::new(),
            sessions: BTreeSet::new(),
            next_testid: 1,
            max_points_per_request: 100_000,
            requests: Vec::new(),
            advance_failures: VecDeque::new(),
            advance_count: 0,
            last_inputs: Map::new(),
            forecast_failures: VecDeque::new(),
            advance_delays: VecDeque::new(),
            kpi_delay: Duration::ZERO,
            initialize_without_snapshot: false,
        }
    }
}

impl MockState {
    fn snapshot(&self) -> Value {
        let mut map = Map::new();
        map.insert("time".into(), json!(self.time));
        for name in MEASUREMENTS {
            map.insert((*name).into(), json!(signal(name, self.time)));
        }
        Value::Object(map)
    }

    pub fn count(&self, request: &str) -> usize {
        self.requests.iter().filter(|r| r.as_str() == request).count()
    }
}

/// Running mock server plus a handle on its state.
pub struct MockServer {
    pub base_url: String,
    pub state: Shared,
}

impl MockServer {
    /// Starts a server on an ephemeral port in a background thread.
    pub fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port bind should succeed");
        listener
            .set_nonblocking(true)
            .expect("listener should switch to non-blocking");
        let addr = listener.local_addr().expect("local_addr should be available");

        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("tokio runtime should build");
            rt.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("listener should convert");
                axum::serve(listener, app).await.expect("mock server should run");
            });
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            retry_backoff_ms: 10,
            ..ClientConfig::local().with_base_url(&self.base_url)
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = self.state.lock().expect("mock state lock");
        f(&mut guard)
    }

    pub fn count(&self, request: &str) -> usize {
        self.with_state(|s| s.count(request))
    }

    pub fn clear_requests(&self) {
        self.with_state(|s| s.requests.clear());
    }
}

/// Default session options used by most tests: `dt = 300 s`, start at 0.
pub fn options_300() -> InitOptions {
    InitOptions::with_step(300.0)
}

/// Deterministic value of a signal at time `t`.
pub fn signal(name: &str, t: f64) -> f64 {
    let day = (2.0 * PI * t / 86_400.0).sin();
    match name {
        "reaTZon_y" => 293.15 + 2.0 * day,
        "reaPHeaPum_y" => 1000.0 + 500.0 * (2.0 * PI * t / 86_400.0).cos(),
        "weaSta_reaWeaTDryBul_y" | "TDryBul" => 273.15 + 5.0 * day,
        "LowerSetp[1]" => 294.15,
        "UpperSetp[1]" => 297.15,
        _ => 0.0,
    }
}

/// Sample times the mock returns for `[start, end]`: both ends plus every
/// multiple of the native interval strictly between them.
pub fn sample_times(start: f64, end: f64) -> Vec<f64> {
    let mut times = vec![start];
    let mut k = (start / SAMPLE_INTERVAL).floor() + 1.0;
    while k * SAMPLE_INTERVAL < end {
        times.push(k * SAMPLE_INTERVAL);
        k += 1.0;
    }
    if end > start {
        times.push(end);
    }
    times
}

pub fn router(state: Shared) -> Router {
    let mut app = Router::new()
        .route("/version", get(version))
        .route("/testcases", get(testcases))
        .route("/testcases/{case}/select", post(select));

    let session_ops: &[(MethodFilter, &'static str, Op)] = &[
        (MethodFilter::GET, "name", op_name),
        (MethodFilter::PUT, "initialize", op_initialize),
        (MethodFilter::GET, "step", op_get_step),
        (MethodFilter::PUT, "step", op_put_step),
        (MethodFilter::GET, "scenario", op_get_scenario),
        (MethodFilter::PUT, "scenario", op_put_scenario),
        (MethodFilter::GET, "inputs", op_inputs),
        (MethodFilter::GET, "measurements", op_measurements),
        (MethodFilter::GET, "forecast_points", op_forecast_points),
        (MethodFilter::PUT, "results", op_results),
        (MethodFilter::PUT, "forecast", op_forecast),
        (MethodFilter::POST, "advance", op_advance),
        (MethodFilter::GET, "kpi", op_kpi),
    ];
    for &(filter, service, op) in session_ops {
        app = app
            .route(
                &format!("/{service}"),
                on(filter, move |State(s): State<Shared>, body: Bytes| async move {
                    respond(&s, service, None, &body, op).await
                }),
            )
            .route(
                &format!("/{service}/{{testid}}"),
                on(
                    filter,
                    move |State(s): State<Shared>, Path(id): Path<String>, body: Bytes| async move {
                        respond(&s, service, Some(id), &body, op).await
                    },
                ),
            );
    }

    // stop only exists on the service layout
    app.route(
        "/stop/{testid}",
        on(
            MethodFilter::PUT,
            |State(s): State<Shared>, Path(id): Path<String>, body: Bytes| async move {
                respond(&s, "stop", Some(id), &body, op_stop).await
            },
        ),
    )
    .fallback(unmatched)
    .layer(middleware::from_fn_with_state(state.clone(), log_request))
    .with_state(state)
}

async fn log_request(State(state): State<Shared>, req: Request, next: Next) -> Response {
    record(&state, format!("{} {}", req.method(), req.uri().path()));
    next.run(req).await
}

async fn unmatched(State(state): State<Shared>, req: Request) -> Reply {
    let path = req.uri().path().to_string();
    record(&state, format!("UNMATCHED {} {path}", req.method()));
    fail(StatusCode::NOT_FOUND, &format!("No route for {path}"))
}

fn record(state: &Shared, line: String) {
    if let Ok(mut s) = state.lock() {
        s.requests.push(line);
    }
}

async fn respond(
    state: &Shared,
    service: &str,
    testid: Option<String>,
    body: &[u8],
    op: Op,
) -> Response {
    let (reply, delay) = dispatch(state, service, testid.as_deref(), body, op);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    reply.into_response()
}

fn dispatch(
    state: &Shared,
    service: &str,
    testid: Option<&str>,
    body: &[u8],
    op: Op,
) -> (Reply, Duration) {
    let Ok(mut s) = state.lock() else {
        return (fail(StatusCode::INTERNAL_SERVER_ERROR, "state poisoned"), Duration::ZERO);
    };
    if let Some(id) = testid {
        if !s.sessions.contains(id) {
            return (
                fail(StatusCode::NOT_FOUND, &format!("Unknown test id {id}")),
                Duration::ZERO,
            );
        }
    }
    let body = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return (fail(StatusCode::BAD_REQUEST, &e.to_string()), Duration::ZERO),
        }
    };
    let reply = op(&mut s, testid, body);
    let delay = match service {
        "kpi" => s.kpi_delay,
        "advance" => s.advance_delays.pop_front().unwrap_or_default(),
        _ => Duration::ZERO,
    };
    (reply, delay)
}

fn ok(payload: Value) -> Reply {
    (
        StatusCode::OK,
        Json(json!({"status": 200, "message": "Request completed.", "payload": payload})),
    )
}

fn fail(code: StatusCode, message: &str) -> Reply {
    (
        code,
        Json(json!({"status": code.as_u16(), "message": message, "payload": null})),
    )
}

async fn version() -> Reply {
    ok(json!({"version": "0.6.0"}))
}

async fn testcases() -> Json<Value> {
    Json(json!([{"testcaseid": "bestest_air"}, {"testcaseid": TESTCASE}]))
}

async fn select(State(state): State<Shared>, Path(case): Path<String>) -> Reply {
    if case != TESTCASE {
        return fail(StatusCode::NOT_FOUND, &format!("Test case {case} not found."));
    }
    let Ok(mut s) = state.lock() else {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, "state poisoned");
    };
    let testid = format!("test-{}", s.next_testid);
    s.next_testid += 1;
    s.sessions.insert(testid.clone());
    (StatusCode::OK, Json(json!({ "testid": testid })))
}

fn op_name(_: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(json!({"name": TESTCASE}))
}

fn op_initialize(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    let start = body.get("start_time").and_then(Value::as_f64).unwrap_or(0.0);
    let warmup = body.get("warmup_period").and_then(Value::as_f64).unwrap_or(0.0);
    if start < 0.0 || warmup < 0.0 {
        return fail(StatusCode::BAD_REQUEST, "start_time and warmup_period must be >= 0");
    }
    s.time = start;
    if s.initialize_without_snapshot {
        return ok(Value::Null);
    }
    ok(s.snapshot())
}

fn op_get_step(s: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(json!(s.step))
}

fn op_put_step(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    match body.get("step").and_then(Value::as_f64) {
        Some(dt) if dt > 0.0 => {
            s.step = dt;
            ok(Value::Null)
        }
        _ => fail(StatusCode::BAD_REQUEST, "step must be a positive number"),
    }
}

fn op_get_scenario(s: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(Value::Object(s.scenario.clone()))
}

fn op_put_scenario(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    let Some(map) = body.as_object() else {
        return fail(StatusCode::BAD_REQUEST, "scenario must be an object");
    };
    let mut payload = Map::new();
    for (key, value) in map {
        match (key.as_str(), value.as_str()) {
            ("electricity_price", Some("constant" | "dynamic" | "highly_dynamic")) => {
                payload.insert(key.clone(), value.clone());
            }
            ("time_period", Some("peak_heat_day")) => {
                s.time = PEAK_HEAT_DAY_START;
                payload.insert(key.clone(), s.snapshot());
            }
            _ => {
                return fail(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid scenario value {value} for {key}"),
                );
            }
        }
        s.scenario.insert(key.clone(), value.clone());
    }
    ok(Value::Object(payload))
}

fn op_inputs(_: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(json!({
        "oveTSet_u": {"Description": "Zone operative temperature setpoint", "Unit": "K", "Minimum": 278.15, "Maximum": 308.15},
        "oveTSet_activate": {"Description": "Activation for zone setpoint", "Unit": null, "Minimum": null, "Maximum": null},
        "ovePum_u": {"Description": "Circulation pump control signal", "Unit": "1", "Minimum": 0, "Maximum": 1},
        "ovePum_activate": {"Description": "Activation for pump signal", "Unit": null, "Minimum": null, "Maximum": null}
    }))
}

fn op_measurements(_: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(json!({
        "reaTZon_y": {"Description": "Zone operative temperature", "Unit": "K", "Minimum": null, "Maximum": null},
        "reaPHeaPum_y": {"Description": "Heat pump electrical power", "Unit": "W", "Minimum": null, "Maximum": null},
        "weaSta_reaWeaTDryBul_y": {"Description": "Outside drybulb temperature", "Unit": "K", "Minimum": null, "Maximum": null}
    }))
}

fn op_forecast_points(_: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    ok(json!({
        "TDryBul": {"Description": "Dry bulb temperature at ground level", "Unit": "K"},
        "LowerSetp[1]": {"Description": "Lower temperature set point", "Unit": "K"},
        "UpperSetp[1]": {"Description": "Upper temperature set point", "Unit": "K"}
    }))
}

fn point_names(body: &Value) -> Option<Vec<String>> {
    body.get("point_names")?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn op_results(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    let (Some(names), Some(start), Some(end)) = (
        point_names(&body),
        body.get("start_time").and_then(Value::as_f64),
        body.get("final_time").and_then(Value::as_f64),
    ) else {
        return fail(StatusCode::BAD_REQUEST, "point_names, start_time and final_time are required");
    };
    if let Some(bad) = names
        .iter()
        .find(|n| !MEASUREMENTS.contains(&n.as_str()) && !INPUTS.contains(&n.as_str()) && n.as_str() != MODE_POINT)
    {
        return fail(StatusCode::BAD_REQUEST, &format!("Unknown point {bad}"));
    }
    let times = sample_times(start, end);
    if times.len() * names.len() > s.max_points_per_request {
        return fail(StatusCode::BAD_REQUEST, "Too many points requested");
    }

    let mut map = Map::new();
    map.insert("time".into(), json!(times));
    for name in &names {
        let values: Vec<Value> = if name == MODE_POINT {
            times
                .iter()
                .map(|t| json!(if signal("reaTZon_y", *t) < 293.15 { "heating" } else { "idle" }))
                .collect()
        } else {
            times.iter().map(|t| json!(signal(name, *t))).collect()
        };
        map.insert(name.clone(), Value::Array(values));
    }
    ok(Value::Object(map))
}

fn op_forecast(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    if let Some(code) = s.forecast_failures.pop_front() {
        let code = StatusCode::from_u16(code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        return fail(code, "Injected forecast failure");
    }
    let (Some(names), Some(horizon), Some(interval)) = (
        point_names(&body),
        body.get("horizon").and_then(Value::as_f64),
        body.get("interval").and_then(Value::as_f64),
    ) else {
        return fail(StatusCode::BAD_REQUEST, "point_names, horizon and interval are required");
    };
    if interval <= 0.0 || horizon < 0.0 {
        return fail(StatusCode::BAD_REQUEST, "invalid horizon or interval");
    }
    if let Some(bad) = names.iter().find(|n| !FORECASTS.contains(&n.as_str())) {
        return fail(StatusCode::BAD_REQUEST, &format!("Unknown forecast point {bad}"));
    }
    let steps = (horizon / interval + 1e-9).floor() as usize;
    let times: Vec<f64> = (0..=steps).map(|k| s.time + k as f64 * interval).collect();

    let mut map = Map::new();
    map.insert("time".into(), json!(times));
    for name in &names {
        let values: Vec<f64> = times.iter().map(|t| signal(name, *t)).collect();
        map.insert(name.clone(), json!(values));
    }
    ok(Value::Object(map))
}

fn op_advance(s: &mut MockState, _: Option<&str>, body: Value) -> Reply {
    if let Some(code) = s.advance_failures.pop_front() {
        let code = StatusCode::from_u16(code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        return fail(code, "Injected advance failure");
    }
    let inputs = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return fail(StatusCode::BAD_REQUEST, "control inputs must be an object"),
    };
    if let Some(bad) = inputs.keys().find(|k| !INPUTS.contains(&k.as_str())) {
        return fail(StatusCode::BAD_REQUEST, &format!("Unexpected input variable: {bad}"));
    }
    s.time += s.step;
    s.advance_count += 1;
    s.last_inputs = inputs;
    ok(s.snapshot())
}

fn op_kpi(s: &mut MockState, _: Option<&str>, _: Value) -> Reply {
    let hours = s.time / 3600.0;
    ok(json!({
        "tdis_tot": 0.1 * hours,
        "idis_tot": 0.0,
        "ener_tot": 0.05 * hours,
        "cost_tot": 0.01 * hours,
        "emis_tot": 0.02 * hours,
        "pele_tot": 0.003,
        "pgas_tot": null,
        "pdih_tot": null,
        "time_rat": 0.0001
    }))
}

fn op_stop(s: &mut MockState, testid: Option<&str>, _: Value) -> Reply {
    if let Some(id) = testid {
        s.sessions.remove(id);
    }
    ok(Value::Null)
}
