use std::sync::Arc;

use anyhow::{Context, Result};

use pulse_auth::{AuthEndpoints, TokenManager, TokenResolution, TokenState};
use pulse_config::{Config, ConfigSink};
use pulse_storage::ResultSink;
use pulse_transport::{LookbackWindow, Transport, bearer_headers};
use pulse_types::{Host, ResultSet};

use crate::{ProbeEngine, ProbeRequest, record_failure};

/// What one run did.
#[derive(Debug)]
pub struct RunReport {
    pub results: ResultSet,
    pub token_state: TokenState,
    /// Outcomes committed to the result sink.
    pub persisted: usize,
    pub write_failures: Vec<(Host, String)>,
}

impl RunReport {
    fn idle() -> Self {
        Self {
            results: ResultSet::new(),
            token_state: TokenState::Unchecked,
            persisted: 0,
            write_failures: Vec::new(),
        }
    }
}

/// Drives one run: credential, probes, persistence.
pub struct RunOrchestrator<S> {
    config_sink: Arc<dyn ConfigSink>,
    results: S,
}

impl<S: ResultSink> RunOrchestrator<S> {
    pub fn new(config_sink: Arc<dyn ConfigSink>, results: S) -> Self {
        Self {
            config_sink,
            results,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.results
    }

    /// Run once against `config`.
    ///
    /// Only bootstrap problems (HTTP client, endpoint URLs) are returned as
    /// errors. A credential that cannot be sent, per-host failures and
    /// per-record failures all end up in the report.
    pub async fn run(&mut self, config: &Config) -> Result<RunReport> {
        let hosts = &config.probe.hosts;
        if hosts.is_empty() {
            tracing::info!("No hosts configured; nothing to probe");
            return Ok(RunReport::idle());
        }

        let transport =
            Transport::new(config.probe.timeout()).context("Failed to build HTTP client")?;
        let endpoints = AuthEndpoints::new(&config.api.base_url)
            .with_context(|| format!("Invalid API base URL {}", config.api.base_url))?;

        let mut tokens =
            TokenManager::new(transport.clone(), endpoints, Arc::clone(&self.config_sink));
        let TokenResolution {
            credential,
            state: token_state,
        } = tokens.resolve(config).await;

        let forwarded_host = config.api.forwarded_host();
        let results = match bearer_headers(&credential, Some(&forwarded_host)) {
            Ok(headers) => {
                let request = ProbeRequest {
                    headers,
                    window: LookbackWindow::ending_now(
                        config.probe.lookback_days,
                        config.probe.utc_offset,
                    ),
                    scheme: config.probe.scheme,
                };
                tracing::info!(
                    hosts = hosts.len(),
                    batch_size = config.probe.batch_size().get(),
                    "Probing hosts"
                );
                let engine = ProbeEngine::new(transport, config.probe.batch_size());
                engine.run(hosts, &request).await
            }
            Err(failure) => {
                tracing::error!(
                    error = %failure,
                    "Cannot build probe headers; recording every host as unreachable"
                );
                record_failure(hosts, &failure)
            }
        };

        let (persisted, write_failures) = self.persist(&results);
        tracing::info!(
            hosts = results.len(),
            succeeded = results.success_count(),
            persisted,
            write_failures = write_failures.len(),
            "Run complete"
        );

        Ok(RunReport {
            results,
            token_state,
            persisted,
            write_failures,
        })
    }

    fn persist(&mut self, results: &ResultSet) -> (usize, Vec<(Host, String)>) {
        if let Err(error) = self.results.ensure_schema() {
            tracing::error!(%error, "Could not prepare results table; attempting inserts anyway");
        }

        let mut persisted = 0;
        let mut failures = Vec::new();
        for outcome in results.iter() {
            match self.results.insert(outcome) {
                Ok(()) => persisted += 1,
                Err(error) => {
                    tracing::warn!(host = %outcome.host, %error, "Failed to store result");
                    failures.push((outcome.host.clone(), error.to_string()));
                }
            }
        }
        (persisted, failures)
    }
}
