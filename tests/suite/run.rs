//! Full runs against a mocked API and fleet

use std::sync::Arc;
use std::time::Duration;

use pulse_auth::TokenState;
use pulse_config::{Config, ConfigSink, FileConfigStore};
use pulse_engine::RunOrchestrator;
use pulse_storage::SqliteResultStore;
use tempfile::TempDir;
use wiremock::{MockServer, ResponseTemplate};

use crate::common::{
    host_of, mount_auth_check, mount_probe, mount_sign_in, token_body, write_config,
};

fn orchestrator(store: &FileConfigStore) -> (RunOrchestrator<SqliteResultStore>, Config) {
    let config = store.load().expect("config loads");
    let db = config.storage.resolved_path().expect("storage path");
    let results = SqliteResultStore::open(db).expect("database opens");
    (
        RunOrchestrator::new(Arc::new(store.clone()), results),
        config,
    )
}

#[tokio::test]
async fn valid_token_probes_and_stores_every_host() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let fleet_a = MockServer::start().await;
    let fleet_b = MockServer::start().await;

    mount_auth_check(&api, "tok1", 200).await;
    mount_sign_in(&api, token_body("unused"), 0).await;
    mount_probe(&fleet_a, "tok1", ResponseTemplate::new(200)).await;
    mount_probe(&fleet_b, "tok1", ResponseTemplate::new(200)).await;

    let hosts = [host_of(&fleet_a), host_of(&fleet_b)];
    let store = FileConfigStore::new(write_config(dir.path(), &api, "tok1", &hosts));
    let (mut orchestrator, config) = orchestrator(&store);

    let report = orchestrator.run(&config).await.unwrap();

    assert_eq!(report.token_state, TokenState::Valid);
    assert_eq!(report.results.len(), 2);
    for host in &hosts {
        let outcome = report.results.get(host).unwrap();
        assert_eq!(outcome.status_code, 200);
    }
    assert_eq!(report.persisted, 2);

    let rows = orchestrator.sink().results().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        let outcome = report
            .results
            .iter()
            .find(|outcome| outcome.host.as_str() == row.host)
            .unwrap();
        assert_eq!(row.status_code, outcome.status_code);
        assert_eq!(row.response_time, outcome.latency_ms);
    }
}

#[tokio::test]
async fn rejected_token_is_refreshed_persisted_and_used() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let fleet = MockServer::start().await;

    mount_auth_check(&api, "tok1", 401).await;
    mount_sign_in(&api, token_body("tok2"), 1).await;
    mount_probe(&fleet, "tok2", ResponseTemplate::new(200)).await;

    let store = FileConfigStore::new(write_config(dir.path(), &api, "tok1", &[host_of(&fleet)]));
    let (mut orchestrator, config) = orchestrator(&store);

    let report = orchestrator.run(&config).await.unwrap();

    assert_eq!(report.token_state, TokenState::Refreshed);
    assert_eq!(
        report.results.get(&host_of(&fleet)).unwrap().status_code,
        200
    );

    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.credential().as_str(), "tok2");
    let written = std::fs::read_to_string(store.path()).unwrap();
    assert!(written.starts_with("# written by the integration suite"));
}

#[tokio::test]
async fn failed_refresh_probes_with_stored_token() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let fleet = MockServer::start().await;

    mount_auth_check(&api, "tok1", 401).await;
    mount_sign_in(
        &api,
        ResponseTemplate::new(403).set_body_json(serde_json::json!({ "result": ["Wrong password"] })),
        1,
    )
    .await;
    mount_probe(&fleet, "tok1", ResponseTemplate::new(401)).await;

    let store = FileConfigStore::new(write_config(dir.path(), &api, "tok1", &[host_of(&fleet)]));
    let (mut orchestrator, config) = orchestrator(&store);

    let report = orchestrator.run(&config).await.unwrap();

    assert_eq!(report.token_state, TokenState::RefreshFailed);
    assert_eq!(
        report.results.get(&host_of(&fleet)).unwrap().status_code,
        401
    );
    assert_eq!(store.load().unwrap().credential().as_str(), "tok1");
    assert_eq!(orchestrator.sink().results().unwrap()[0].status_code, 401);
}

#[tokio::test]
async fn slow_host_is_recorded_without_a_status() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;

    mount_auth_check(&api, "tok1", 200).await;
    mount_probe(
        &slow,
        "tok1",
        ResponseTemplate::new(200).set_delay(Duration::from_secs(3)),
    )
    .await;
    mount_probe(&fast, "tok1", ResponseTemplate::new(200)).await;

    let store = FileConfigStore::new(write_config(
        dir.path(),
        &api,
        "tok1",
        &[host_of(&slow), host_of(&fast)],
    ));
    let (mut orchestrator, config) = orchestrator(&store);

    let report = orchestrator.run(&config).await.unwrap();

    let slow = report.results.get(&host_of(&slow)).unwrap();
    assert_eq!(slow.status_code, 0);
    assert!(slow.latency_ms >= 1_000);
    assert_eq!(report.results.get(&host_of(&fast)).unwrap().status_code, 200);
    assert_eq!(report.persisted, 2);
}

#[tokio::test]
async fn stored_latency_matches_response_delay() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let quick = MockServer::start().await;
    let sluggish = MockServer::start().await;
    let quick_delay = Duration::from_millis(50);
    let sluggish_delay = Duration::from_millis(400);

    mount_auth_check(&api, "tok1", 200).await;
    mount_probe(&quick, "tok1", ResponseTemplate::new(200).set_delay(quick_delay)).await;
    mount_probe(
        &sluggish,
        "tok1",
        ResponseTemplate::new(200).set_delay(sluggish_delay),
    )
    .await;

    let store = FileConfigStore::new(write_config(
        dir.path(),
        &api,
        "tok1",
        &[host_of(&quick), host_of(&sluggish)],
    ));
    let (mut orchestrator, config) = orchestrator(&store);
    let deadline = config.probe.timeout();

    let report = orchestrator.run(&config).await.unwrap();
    let rows = orchestrator.sink().results().unwrap();
    assert_eq!(rows.len(), 2);

    for (server, delay) in [(&quick, quick_delay), (&sluggish, sluggish_delay)] {
        let outcome = report.results.get(&host_of(server)).unwrap();
        assert_eq!(outcome.status_code, 200);
        let latency = Duration::from_millis(outcome.latency_ms);
        assert!(latency >= delay, "latency {latency:?} for delay {delay:?}");
        assert!(latency < deadline, "latency {latency:?}");

        let row = rows
            .iter()
            .find(|row| row.host == outcome.host.as_str())
            .unwrap();
        assert_eq!(row.response_time, outcome.latency_ms);
        assert_eq!(row.status_code, 200);
    }
}
