//! Error taxonomy for every client operation.

use thiserror::Error;

use crate::config::ConfigError;

pub type BoptestResult<T> = Result<T, BoptestError>;

#[derive(Error, Debug)]
pub enum BoptestError {
    #[error("test case `{testcase}` could not be selected (status {status}): {message}")]
    Selection {
        testcase: String,
        status: u16,
        message: String,
    },

    #[error("initialization failed (status {status}): {message}")]
    Initialization { status: u16, message: String },

    #[error("setting the control step failed (status {status}): {message}")]
    StepConfig { status: u16, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned status {status}: {message}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response shape: {what}")]
    DataShape { what: String },

    #[error("invalid control input `{name}`: {reason}")]
    InvalidControl { name: String, reason: String },

    #[error("invalid argument: {what}")]
    InvalidArg { what: String },

    #[error("invalid configuration: {0}")]
    Config(ConfigError),
}

impl BoptestError {
    pub(crate) fn shape(what: impl Into<String>) -> Self {
        Self::DataShape { what: what.into() }
    }

    pub(crate) fn arg(what: impl Into<String>) -> Self {
        Self::InvalidArg { what: what.into() }
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Selection { status, .. }
            | Self::Initialization { status, .. }
            | Self::StepConfig { status, .. }
            | Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ConfigError> for BoptestError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
