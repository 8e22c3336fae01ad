//! Deadline-bounded HTTP transport.
//!
//! # Architecture
//!
//! - [`Transport`] - one `reqwest` client plus the per-request deadline shared
//!   by every call in a run
//! - [`failure`] - the [`ProbeFailure`] tagged union and [`classify`]
//! - [`window`] - lookback window rendering and probe URL construction
//!
//! # Deadlines
//!
//! Each call races the request against its own `tokio::time::timeout`. When
//! the deadline wins, the request future is dropped (cancelling it) and the
//! call returns [`ProbeFailure::Timeout`]. Sibling requests are unaffected.
//!
//! A non-2xx response is not a failure at this layer. Callers that need 2xx
//! use [`require_success`].

pub mod failure;
pub mod window;

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use url::Url;

use pulse_types::Credential;

pub use failure::{ProbeFailure, classify};
pub use reqwest;
pub use window::{LookbackWindow, PROBE_PATH, probe_url};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Deadline applied to every request unless configured otherwise.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(180);

/// Header naming the origin the probed host should serve telemetry for.
pub const FORWARDED_HOST: &str = "x-forwarded-host";

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    deadline: Duration,
}

impl Transport {
    pub fn new(deadline: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(base_client_builder().build()?, deadline))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Issue a GET and return the response status, whatever it is.
    pub async fn get(&self, url: Url, headers: &HeaderMap) -> Result<StatusCode, ProbeFailure> {
        let request = self.client.get(url).headers(headers.clone());
        self.send(request).await.map(|response| response.status())
    }

    /// Issue a POST, with a JSON body when one is given.
    pub async fn post_json<T>(
        &self,
        url: Url,
        headers: &HeaderMap,
        body: Option<&T>,
    ) -> Result<Response, ProbeFailure>
    where
        T: Serialize + ?Sized,
    {
        let mut request = self.client.post(url).headers(headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    /// Read a JSON body under the same deadline as the request.
    pub async fn read_json(&self, response: Response) -> Result<serde_json::Value, ProbeFailure> {
        match tokio::time::timeout(self.deadline, response.json::<serde_json::Value>()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(&e)),
            Err(_) => Err(ProbeFailure::Timeout),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProbeFailure> {
        match tokio::time::timeout(self.deadline, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(classify(&e)),
            Err(_) => {
                tracing::debug!(
                    deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
                    "Request exceeded deadline"
                );
                Err(ProbeFailure::Timeout)
            }
        }
    }
}

/// Turn a non-2xx response into [`ProbeFailure::Http`].
pub fn require_success(response: Response) -> Result<Response, ProbeFailure> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ProbeFailure::Http {
            status: status.as_u16(),
        })
    }
}

/// `Authorization: Bearer <token>`, plus `X-Forwarded-Host` when given.
pub fn bearer_headers(
    credential: &Credential,
    forwarded_host: Option<&str>,
) -> Result<HeaderMap, ProbeFailure> {
    let mut headers = HeaderMap::new();

    let mut authorization = HeaderValue::from_str(&credential.bearer())
        .map_err(|_| ProbeFailure::setup("bearer token is not a valid header value"))?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);

    if let Some(origin) = forwarded_host {
        let value = HeaderValue::from_str(origin)
            .map_err(|_| ProbeFailure::setup(format!("invalid forwarded host {origin:?}")))?;
        headers.insert(FORWARDED_HOST, value);
    }

    Ok(headers)
}
