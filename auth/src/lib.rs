//! Bearer token validation and refresh.
//!
//! A run resolves its credential once, before any probe is sent:
//!
//! ```text
//! Unchecked ──check ok──────────────────────────▶ Valid
//!     │
//!     └──rejected / unreachable──▶ Invalid ──sign-in ok──▶ Refreshed
//!                                     │
//!                                     └──sign-in failed──▶ RefreshFailed
//! ```
//!
//! `resolve` makes at most one check call and at most one sign-in call. It
//! always returns a credential: when refreshing fails the stored one is used
//! and the probes are left to report what the fleet thinks of it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use pulse_config::{Config, ConfigError, ConfigSink, LoginCredentials};
use pulse_transport::reqwest::header::HeaderMap;
use pulse_transport::{ProbeFailure, Transport, bearer_headers, require_success};
use pulse_types::Credential;

pub const AUTH_CHECK_PATH: &str = "/v1/auth/is_auth";
pub const SIGN_IN_PATH: &str = "/v2/auth/sign_in";

/// Where the sign-in response carries the fresh token.
const TOKEN_POINTER: &str = "/result/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Unchecked,
    Valid,
    Invalid,
    Refreshed,
    RefreshFailed,
}

/// Result of asking the central API whether a token is still accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCheck {
    Valid,
    /// The API answered outside 2xx.
    Rejected(u16),
    /// No usable answer: timeout, connection failure, bad header.
    TransportError(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no login credentials configured")]
    MissingLogin,
    #[error("sign-in failed: {failure}{}", server_note(.message.as_deref()))]
    Refresh {
        failure: ProbeFailure,
        message: Option<String>,
    },
    #[error("sign-in response carried no token")]
    MissingToken,
    #[error("sign-in returned an unusable token: {0}")]
    UnusableToken(ProbeFailure),
    #[error("failed to persist refreshed token: {0}")]
    Persist(#[from] ConfigError),
}

fn server_note(message: Option<&str>) -> String {
    message.map_or_else(String::new, |message| format!(" ({message})"))
}

impl AuthError {
    fn refresh(failure: ProbeFailure) -> Self {
        Self::Refresh {
            failure,
            message: None,
        }
    }
}

/// The credential a run should use, and how it was obtained.
#[derive(Debug, Clone)]
pub struct TokenResolution {
    pub credential: Credential,
    pub state: TokenState,
}

/// Auth endpoints resolved against the API base URL.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    check: Url,
    sign_in: Url,
}

impl AuthEndpoints {
    pub fn new(base: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            check: base.join(AUTH_CHECK_PATH)?,
            sign_in: base.join(SIGN_IN_PATH)?,
        })
    }

    #[must_use]
    pub fn check(&self) -> &Url {
        &self.check
    }

    #[must_use]
    pub fn sign_in(&self) -> &Url {
        &self.sign_in
    }
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

pub struct TokenManager {
    transport: Transport,
    endpoints: AuthEndpoints,
    sink: Arc<dyn ConfigSink>,
    state: TokenState,
}

impl TokenManager {
    pub fn new(transport: Transport, endpoints: AuthEndpoints, sink: Arc<dyn ConfigSink>) -> Self {
        Self {
            transport,
            endpoints,
            sink,
            state: TokenState::Unchecked,
        }
    }

    /// State reached by the most recent [`resolve`](Self::resolve).
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.state
    }

    /// Produce the credential for this run, refreshing and persisting it when
    /// the stored one is no longer accepted.
    pub async fn resolve(&mut self, config: &Config) -> TokenResolution {
        self.state = TokenState::Unchecked;
        let current = config.credential();

        match self.check(&current).await {
            AuthCheck::Valid => {
                tracing::info!("Token is valid");
                return self.settle(current, TokenState::Valid);
            }
            AuthCheck::Rejected(status) => {
                tracing::warn!(status, "Token rejected; requesting a new one");
            }
            AuthCheck::TransportError(error) => {
                tracing::warn!(%error, "Token check failed; requesting a new one");
            }
        }
        self.state = TokenState::Invalid;

        let fresh = match config.login() {
            Some(login) => self.sign_in(&login).await,
            None => Err(AuthError::MissingLogin),
        };

        match fresh {
            Ok(fresh) => {
                if let Err(e) = self.sink.save(&config.with_credential(&fresh)) {
                    let error = AuthError::Persist(e);
                    tracing::error!(%error, "Continuing with the refreshed token in memory");
                }
                self.settle(fresh, TokenState::Refreshed)
            }
            Err(error) => {
                tracing::warn!(%error, "Could not get a new token; continuing with the stored one");
                self.settle(current, TokenState::RefreshFailed)
            }
        }
    }

    fn settle(&mut self, credential: Credential, state: TokenState) -> TokenResolution {
        self.state = state;
        TokenResolution { credential, state }
    }

    /// Ask the API whether `credential` is still accepted.
    pub async fn check(&self, credential: &Credential) -> AuthCheck {
        let headers = match bearer_headers(credential, None) {
            Ok(headers) => headers,
            Err(failure) => return AuthCheck::TransportError(failure.to_string()),
        };

        let response = self
            .transport
            .post_json::<()>(self.endpoints.check.clone(), &headers, None)
            .await
            .and_then(require_success);

        match response {
            Ok(response) => {
                if let Ok(body) = self.transport.read_json(response).await {
                    let result = body.get("result").cloned().unwrap_or_default();
                    tracing::debug!(%result, "Auth check");
                }
                AuthCheck::Valid
            }
            Err(ProbeFailure::Http { status }) => AuthCheck::Rejected(status),
            Err(failure) => AuthCheck::TransportError(failure.to_string()),
        }
    }

    /// Exchange email and password for a fresh token.
    pub async fn sign_in(&self, login: &LoginCredentials) -> Result<Credential, AuthError> {
        let body = SignInRequest {
            email: &login.email,
            password: &login.password,
        };
        let response = self
            .transport
            .post_json(self.endpoints.sign_in.clone(), &HeaderMap::new(), Some(&body))
            .await
            .map_err(AuthError::refresh)?;

        let status = response.status();
        let payload = self.transport.read_json(response).await;

        if !status.is_success() {
            return Err(AuthError::Refresh {
                failure: ProbeFailure::Http {
                    status: status.as_u16(),
                },
                message: payload.ok().as_ref().and_then(server_message),
            });
        }

        let payload = payload.map_err(AuthError::refresh)?;
        let token = extract_token(&payload).ok_or(AuthError::MissingToken)?;
        // Must fit in an Authorization header, or every probe would be unsendable.
        bearer_headers(&token, None).map_err(AuthError::UnusableToken)?;
        Ok(token)
    }
}

fn extract_token(payload: &Value) -> Option<Credential> {
    payload
        .pointer(TOKEN_POINTER)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Credential::new)
}

/// Human-readable reason from a failed sign-in body.
fn server_message(payload: &Value) -> Option<String> {
    [TOKEN_POINTER, "/message", "/error/message"]
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
        .map(ToString::to_string)
}
