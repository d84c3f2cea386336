//! Blocking JSON transport over `reqwest`.
//!
//! Every BOPTEST response is wrapped in an envelope
//! `{"status": .., "message": .., "payload": ..}`. [`Reply::into_payload`]
//! unwraps it and turns non-2xx statuses into errors. Only `advance` goes
//! through [`Transport::post_with_retry`]; all other calls fail on the first
//! error.

use std::thread;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::{BoptestError, BoptestResult};

/// Raw server answer: status code plus the decoded JSON body.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Human-readable message from an envelope, falling back to the raw body.
    pub fn message(&self) -> String {
        match &self.body {
            Value::Object(map) => {
                if let Some(msg) = map.get("message").and_then(Value::as_str) {
                    return msg.to_string();
                }
                if let Some(errors) = map.get("errors") {
                    return errors.to_string();
                }
                self.body.to_string()
            }
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Returns the envelope payload of a successful reply.
    ///
    /// # Errors
    ///
    /// `Status` for non-2xx replies, `DataShape` if the body has no `payload`.
    pub fn into_payload(self, method: &'static str, url: &str) -> BoptestResult<Value> {
        if !self.is_success() {
            return Err(BoptestError::Status {
                method,
                url: url.to_string(),
                status: self.status,
                message: self.message(),
            });
        }
        match self.body {
            Value::Object(mut map) => map
                .remove("payload")
                .ok_or_else(|| BoptestError::shape(format!("{method} {url}: no `payload` key"))),
            _ => Err(BoptestError::shape(format!(
                "{method} {url}: body is not a JSON object"
            ))),
        }
    }
}

/// Shared HTTP client for one session.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    advance_retry: RetryPolicy,
    retry_backoff: Duration,
}

impl Transport {
    /// Builds a transport from a validated configuration.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid, `Network` if the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ClientConfig) -> BoptestResult<Self> {
        if let Some(first) = config.validate().into_iter().next() {
            return Err(first.into());
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| BoptestError::Network {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            advance_retry: config.advance_retry,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn get(&self, url: &str) -> BoptestResult<Reply> {
        self.send(Method::GET, url, None)
    }

    pub fn put(&self, url: &str, body: Option<&Value>) -> BoptestResult<Reply> {
        self.send(Method::PUT, url, body)
    }

    pub fn post(&self, url: &str, body: &Value) -> BoptestResult<Reply> {
        self.send(Method::POST, url, Some(body))
    }

    /// POST that may be retried once according to the configured policy.
    ///
    /// A retry after a timeout or gateway error can apply the request twice
    /// on the server. There is no idempotency key in the API to prevent it.
    pub fn post_with_retry(&self, url: &str, body: &Value) -> BoptestResult<Reply> {
        let first = self.post(url, body);
        if !self.should_retry(&first) {
            return first;
        }
        let delay = self.jittered_backoff();
        match &first {
            Ok(reply) => warn!(url, status = reply.status, ?delay, "retrying POST"),
            Err(e) => warn!(url, error = %e, ?delay, "retrying POST"),
        }
        thread::sleep(delay);
        self.post(url, body)
    }

    fn should_retry(&self, outcome: &BoptestResult<Reply>) -> bool {
        match (self.advance_retry, outcome) {
            (RetryPolicy::Never, _) => false,
            (_, Err(BoptestError::Network { source, .. })) if source.is_connect() => true,
            (RetryPolicy::AtMostOnce, _) => false,
            (RetryPolicy::Once, Err(BoptestError::Timeout { .. })) => true,
            (RetryPolicy::Once, Ok(reply)) => matches!(reply.status, 502..=504),
            (RetryPolicy::Once, Err(_)) => false,
        }
    }

    fn jittered_backoff(&self) -> Duration {
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        self.retry_backoff.mul_f64(factor)
    }

    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> BoptestResult<Reply> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let text = response.text().map_err(|e| classify(url, e))?;
        debug!(%method, url, status, "BOPTEST request");
        Ok(Reply {
            status,
            body: decode_body(&text),
        })
    }
}

/// Decodes a response body, keeping non-JSON text (e.g. HTML error pages) as a string.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn classify(url: &str, source: reqwest::Error) -> BoptestError {
    if source.is_timeout() {
        BoptestError::Timeout {
            url: url.to_string(),
        }
    } else {
        BoptestError::Network {
            url: url.to_string(),
            source,
        }
    }
}
