//! Failure classification.
//!
//! Every way a request can go wrong collapses into one of three shapes. Only
//! [`ProbeFailure::Http`] carries a status worth recording; timeouts and setup
//! failures are recorded as [`NO_RESPONSE`].

use std::error::Error as StdError;

use thiserror::Error;

use pulse_types::NO_RESPONSE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    /// The server answered outside the 2xx range.
    #[error("server responded with HTTP {status}")]
    Http { status: u16 },
    /// The deadline elapsed before a response arrived.
    #[error("no response before the deadline")]
    Timeout,
    /// The request failed before any response: DNS, refused connection,
    /// TLS, malformed URL or header.
    #[error("request failed: {message}")]
    Setup { message: String },
}

impl ProbeFailure {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Status code to record for this failure.
    #[must_use]
    pub const fn recorded_status(&self) -> u16 {
        match self {
            Self::Http { status } => *status,
            Self::Timeout | Self::Setup { .. } => NO_RESPONSE,
        }
    }

    /// Short label for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Timeout => "timeout",
            Self::Setup { .. } => "setup",
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Map a `reqwest` error onto a [`ProbeFailure`].
#[must_use]
pub fn classify(error: &reqwest::Error) -> ProbeFailure {
    if error.is_timeout() {
        return ProbeFailure::Timeout;
    }
    if let Some(status) = error.status() {
        return ProbeFailure::Http {
            status: status.as_u16(),
        };
    }
    ProbeFailure::setup(describe(error))
}

/// Render an error with its source chain; reqwest's top-level message alone
/// rarely says which host or which step failed.
fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
