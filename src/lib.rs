//! Client for the BOPTEST building-simulation REST API.
//!
//! Works against a single-tenant BOPTEST server ([`Plant::init_local`]) or
//! the multi-tenant BOPTEST-Service ([`Plant::init_service`]). All calls are
//! blocking.

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod kpi;
pub mod mirror;
pub mod plant;
pub mod points;
pub mod table;
pub mod transport;

pub use config::{ClientConfig, RetryPolicy};
pub use control::{ControlInputs, control_inputs};
pub use error::{BoptestError, BoptestResult};
pub use kpi::KpiReport;
pub use mirror::CachedPlant;
pub use plant::{InitOptions, InitParams, Plant, Scenario};
pub use points::{PointCategory, PointDescriptor};
pub use table::{Column, Snapshot, Table};
