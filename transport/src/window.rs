//! Lookback window and probe URL construction.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use url::Url;

use pulse_types::Host;

use crate::ProbeFailure;

/// Path of the telemetry endpoint probed on every host.
pub const PROBE_PATH: &str = "/v1/tenants/telemetry";

/// The `[start_date, end_date]` range sent with every probe.
///
/// Both ends are expressed in one fixed offset and rendered as
/// `YYYY-MM-DD HH:MM:SS +HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl LookbackWindow {
    #[must_use]
    pub fn ending_at(now: DateTime<Utc>, days: u32, offset: FixedOffset) -> Self {
        let end = now.with_timezone(&offset);
        let start = TimeDelta::try_days(i64::from(days))
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(end);
        Self { start, end }
    }

    #[must_use]
    pub fn ending_now(days: u32, offset: FixedOffset) -> Self {
        Self::ending_at(Utc::now(), days, offset)
    }

    #[must_use]
    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    /// Query parameters in wire order, before URL encoding.
    #[must_use]
    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("start_date", render(self.start)),
            ("end_date", render(self.end)),
        ]
    }
}

fn render(at: DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M:%S %:z").to_string()
}

/// `<scheme>://<host>/v1/tenants/telemetry?start_date=..&end_date=..`
///
/// Values are form-urlencoded: spaces become `+` and the offset's `+`
/// becomes `%2B`.
pub fn probe_url(scheme: &str, host: &Host, window: &LookbackWindow) -> Result<Url, ProbeFailure> {
    let mut url = Url::parse(&format!("{scheme}://{host}{PROBE_PATH}"))
        .map_err(|e| ProbeFailure::setup(format!("invalid probe URL for {host}: {e}")))?;
    url.query_pairs_mut().extend_pairs(window.query_pairs());
    Ok(url)
}
