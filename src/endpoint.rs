//! URL resolution for single-tenant and multi-tenant deployments.

use std::fmt;

/// Where requests for one session go.
///
/// Resolved once when the session is created and never re-checked per call.
///
/// # Examples
///
/// ```
/// use boptest_client::endpoint::Endpoint;
///
/// let local = Endpoint::local("http://127.0.0.1:5000/");
/// assert_eq!(local.url("advance"), "http://127.0.0.1:5000/advance");
///
/// let svc = Endpoint::service("http://api.boptest.net", "abc-123");
/// assert_eq!(svc.url("kpi"), "http://api.boptest.net/kpi/abc-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A BOPTEST server running exactly one test case.
    Local { base_url: String },
    /// A BOPTEST-Service deployment; every call carries the test id.
    Service { base_url: String, testid: String },
}

impl Endpoint {
    pub fn local(base_url: &str) -> Self {
        Self::Local {
            base_url: trim_base(base_url),
        }
    }

    pub fn service(base_url: &str, testid: impl Into<String>) -> Self {
        Self::Service {
            base_url: trim_base(base_url),
            testid: testid.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            Self::Local { base_url } | Self::Service { base_url, .. } => base_url,
        }
    }

    /// Test id of a service session, `None` for a local server.
    pub fn testid(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::Service { testid, .. } => Some(testid),
        }
    }

    /// Absolute URL of a session-bound service (`advance`, `results`, ...).
    pub fn url(&self, service: &str) -> String {
        match self {
            Self::Local { base_url } => format!("{base_url}/{service}"),
            Self::Service { base_url, testid } => format!("{base_url}/{service}/{testid}"),
        }
    }

    /// Absolute URL of a service that is not bound to a test id.
    pub fn root_url(&self, service: &str) -> String {
        format!("{}/{service}", self.base_url())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { base_url } => write!(f, "{base_url} (local)"),
            Self::Service { base_url, testid } => write!(f, "{base_url} (testid {testid})"),
        }
    }
}

/// URL of the test-case selection call on a service deployment.
pub fn select_url(base_url: &str, testcase: &str) -> String {
    format!("{}/testcases/{testcase}/select", trim_base(base_url))
}

/// URL of the test-case listing on a service deployment.
pub fn testcases_url(base_url: &str) -> String {
    format!("{}/testcases", trim_base(base_url))
}

fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}
