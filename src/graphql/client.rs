//! Retrying HTTP client for the GraphQL endpoint.
//!
//! [`GraphQlClient`] wraps one pooled `reqwest::Client` together with the
//! endpoint, the fixed request headers and the [`RetryPolicy`]. It is cheap to
//! clone and every worker holds its own clone; nothing here is process-global.

use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, instrument, warn};

use super::payload::GraphQlPayload;
use super::retry::{RetryDecision, RetryPolicy};
use super::GraphQlError;

/// Default GraphQL endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.newrelic.com/graphql";

/// Default HTTP connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-attempt request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Everything needed to build a [`GraphQlClient`] for one run.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub api_key: ApiKey,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ClientSettings {
    /// Settings for `endpoint` with default timeouts and retry policy.
    pub fn new(endpoint: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// HTTP client that issues GraphQL requests with bounded retry.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    client: Client,
    endpoint: String,
    headers: HeaderMap,
    retry_policy: RetryPolicy,
}

impl GraphQlClient {
    /// Builds the client, its header template and connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`GraphQlError::InvalidHeader`] if the API key is not a valid
    /// header value, or [`GraphQlError::ClientBuild`] if reqwest fails to
    /// initialize.
    pub fn new(settings: &ClientSettings) -> Result<Self, GraphQlError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(settings.api_key.expose())
            .map_err(|_| GraphQlError::InvalidHeader { name: "API-Key" })?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static("api-key"), key);

        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(user_agent())
            .gzip(true)
            .build()
            .map_err(|source| GraphQlError::ClientBuild { source })?;

        debug!(
            endpoint = %settings.endpoint,
            max_attempts = settings.retry_policy.max_attempts(),
            request_timeout_ms = settings.request_timeout.as_millis(),
            "creating GraphQL client"
        );

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            headers,
            retry_policy: settings.retry_policy.clone(),
        })
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serializes `payload` and posts it to the endpoint.
    ///
    /// Returns the raw response body; see [`fetch`](Self::fetch) for the
    /// retry and empty-body semantics.
    pub async fn fetch_graphql(&self, payload: &GraphQlPayload) -> Vec<u8> {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(source) => {
                warn!(error = %GraphQlError::Encode { source }, "skipping request");
                return Vec::new();
            }
        };
        self.fetch(Method::POST, &self.endpoint, &body, &self.headers)
            .await
    }

    /// Performs a request with bounded retry and returns the response body.
    ///
    /// An attempt fails on a transport error or a status outside the success
    /// set. After the last attempt the most recent response body is returned
    /// whatever its status. If no attempt produced a response the result is
    /// empty: callers treat that as an unparseable body, never a crash.
    #[instrument(skip_all, fields(method = %method, url = %url))]
    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        payload: &str,
        headers: &HeaderMap,
    ) -> Vec<u8> {
        let mut last_body: Option<Vec<u8>> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.send_once(method.clone(), url, payload, headers).await {
                Ok((status, body)) => {
                    if self.retry_policy.is_success(status) {
                        debug!(attempt, status, bytes = body.len(), "request succeeded");
                        return body;
                    }
                    warn!(attempt, status, "request returned non-success status");
                    last_body = Some(body);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "request got no response");
                }
            }

            match self.retry_policy.should_retry(attempt) {
                RetryDecision::Retry { delay, .. } => tokio::time::sleep(delay).await,
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying request");
                    break;
                }
            }
        }

        last_body.unwrap_or_else(|| {
            warn!(attempts = attempt, "no response received, returning empty body");
            Vec::new()
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        payload: &str,
        headers: &HeaderMap,
    ) -> Result<(u16, Vec<u8>), GraphQlError> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if !payload.is_empty() {
            request = request.body(payload.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| GraphQlError::transport(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GraphQlError::transport(url, e))?;
        Ok((status, body.to_vec()))
    }
}

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("dashboard-export/{version}")
}
