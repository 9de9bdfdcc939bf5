//! HTTP access to the backend provider.
//!
//! Every call goes through [`Transport::send`] and comes back as one of the
//! four [`Outcome`] variants, so nothing above this layer has to guess what
//! shape the provider answered with. The transport never retries: a failed
//! call is reported once and the caller decides what to compensate.
use std::{future::Future, pin::Pin, time::Duration};

pub use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde_json::Value;

use crate::{
    EngineError, ResultEngine,
    util::{LOG_BODY_LIMIT, truncate},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Normalized provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx without a body.
    Empty,
    /// 2xx with a JSON body.
    Payload(Value),
    /// 404, zero rows, or an explicit not-found marker.
    NotFound,
    /// Anything else, including network errors and timeouts.
    Failure(String),
}

impl Outcome {
    /// Maps a raw status/body pair onto an outcome.
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 404 {
            return Self::NotFound;
        }
        if !(200..300).contains(&status) {
            return Self::Failure(format!(
                "HTTP {status}: {}",
                truncate(body.trim(), LOG_BODY_LIMIT)
            ));
        }

        let body = body.trim();
        if body.is_empty() {
            return Self::Empty;
        }

        match serde_json::from_str::<Value>(body) {
            Ok(Value::Null) => Self::NotFound,
            Ok(Value::Array(items)) if items.is_empty() => Self::NotFound,
            Ok(value) if is_not_found_marker(&value) => Self::NotFound,
            Ok(value) => Self::Payload(value),
            Err(_) => {
                tracing::warn!("provider returned a non-JSON success body, treating as empty");
                Self::Empty
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Payload(_) => "payload",
            Self::NotFound => "not_found",
            Self::Failure(_) => "failure",
        }
    }
}

fn is_not_found_marker(value: &Value) -> bool {
    ["error_code", "code"].iter().any(|key| {
        value
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|code| code == "user_not_found")
    })
}

/// Issues one request against the provider.
///
/// `path` is relative to the provider root, e.g. `/rest/v1/users?uid=eq.1`.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Outcome>;
}

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub service_key: String,
    pub timeout: Duration,
}

/// [`Transport`] backed by `reqwest`, talking to the hosted provider.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    apikey: HeaderValue,
    bearer: HeaderValue,
    http: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> ResultEngine<Self> {
        let key = config.service_key.trim();
        if key.is_empty() {
            return Err(EngineError::Config("service key is missing".to_string()));
        }
        let apikey = sensitive_header(key)?;
        let bearer = sensitive_header(&format!("Bearer {key}"))?;

        url::Url::parse(&config.base_url)
            .map_err(|err| EngineError::Config(format!("invalid base_url: {err}")))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EngineError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: config.base_url,
            apikey,
            bearer,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Outcome {
        match body {
            Some(body) => tracing::debug!(
                %method,
                path,
                body = %truncate(&body.to_string(), LOG_BODY_LIMIT),
                "provider request"
            ),
            None => tracing::debug!(%method, path, "provider request"),
        }

        let mut req = self
            .http
            .request(method.clone(), self.url(path))
            .header("apikey", self.apikey.clone())
            .header(AUTHORIZATION, self.bearer.clone())
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                let detail = if err.is_timeout() {
                    format!("request timed out: {err}")
                } else {
                    format!("request failed: {err}")
                };
                tracing::error!(%method, path, "{detail}");
                return Outcome::Failure(detail);
            }
        };

        let status = resp.status().as_u16();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(err) => {
                let detail = format!("failed to read response body: {err}");
                tracing::error!(%method, path, status, "{detail}");
                return Outcome::Failure(detail);
            }
        };

        let outcome = Outcome::from_response(status, &text);
        match &outcome {
            Outcome::Failure(detail) => {
                tracing::error!(%method, path, status, "provider call failed: {detail}")
            }
            other => tracing::debug!(
                %method,
                path,
                status,
                outcome = other.label(),
                body = %truncate(&text, LOG_BODY_LIMIT),
                "provider response"
            ),
        }
        outcome
    }
}

fn sensitive_header(value: &str) -> ResultEngine<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|err| EngineError::Config(format!("invalid service key: {err}")))?;
    header.set_sensitive(true);
    Ok(header)
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(self.execute(method, path, body))
    }
}
