use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;

use pulse_config::Scheme;
use pulse_transport::reqwest::header::HeaderMap;
use pulse_transport::{LookbackWindow, ProbeFailure, Transport, probe_url};
use pulse_types::{Host, ProbeOutcome, ResultSet};

/// Everything shared by the probes of one run.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub headers: HeaderMap,
    pub window: LookbackWindow,
    pub scheme: Scheme,
}

/// Drop repeated hosts, keeping the first occurrence of each.
#[must_use]
pub fn dedupe(hosts: &[Host]) -> Vec<Host> {
    let mut seen = HashSet::with_capacity(hosts.len());
    hosts
        .iter()
        .filter(|host| seen.insert(*host))
        .cloned()
        .collect()
}

/// Ordered batches of at most `size` hosts; only the last may be shorter.
pub fn partition(hosts: &[Host], size: NonZeroUsize) -> impl Iterator<Item = &[Host]> {
    hosts.chunks(size.get())
}

pub struct ProbeEngine {
    transport: Transport,
    batch_size: NonZeroUsize,
}

impl ProbeEngine {
    #[must_use]
    pub fn new(transport: Transport, batch_size: NonZeroUsize) -> Self {
        Self {
            transport,
            batch_size,
        }
    }

    /// Probe every distinct host once.
    ///
    /// Batches run one after another; the probes inside a batch run
    /// concurrently and are all joined before the next batch starts.
    pub async fn run(&self, hosts: &[Host], request: &ProbeRequest) -> ResultSet {
        let hosts = dedupe(hosts);
        let mut results = ResultSet::new();

        for (index, batch) in partition(&hosts, self.batch_size).enumerate() {
            tracing::debug!(batch = index, size = batch.len(), "Probing batch");
            let outcomes = join_all(batch.iter().map(|host| self.probe(host, request))).await;
            results.merge(outcomes);
        }

        results
    }

    /// Probe one host. Never fails: errors become a recorded status.
    pub async fn probe(&self, host: &Host, request: &ProbeRequest) -> ProbeOutcome {
        let observed_at = Utc::now();
        let started = Instant::now();

        let response = match probe_url(request.scheme.as_str(), host, &request.window) {
            Ok(url) => self.transport.get(url, &request.headers).await,
            Err(failure) => Err(failure),
        };
        let latency = started.elapsed();
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let status = match response {
            Ok(status) if status.is_success() => {
                tracing::debug!(%host, status = status.as_u16(), latency_ms, "Probe succeeded");
                status.as_u16()
            }
            Ok(status) => report(
                host,
                &ProbeFailure::Http {
                    status: status.as_u16(),
                },
                latency_ms,
            ),
            Err(failure) => report(host, &failure, latency_ms),
        };

        ProbeOutcome::new(host.clone(), status, latency, observed_at)
    }
}

/// Record `failure` for every distinct host without sending anything.
///
/// Used when no probe can be built at all, so the run still has one outcome
/// per host to store.
#[must_use]
pub fn record_failure(hosts: &[Host], failure: &ProbeFailure) -> ResultSet {
    let observed_at = Utc::now();
    let mut results = ResultSet::new();
    results.merge(dedupe(hosts).into_iter().map(|host| {
        let status = report(&host, failure, 0);
        ProbeOutcome::new(host, status, Duration::ZERO, observed_at)
    }));
    results
}

fn report(host: &Host, failure: &ProbeFailure, latency_ms: u64) -> u16 {
    let status = failure.recorded_status();
    tracing::warn!(
        %host,
        kind = failure.kind(),
        status,
        latency_ms,
        error = %failure,
        "Probe failed"
    );
    status
}
