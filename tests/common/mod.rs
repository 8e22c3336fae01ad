//! Shared test utilities and fixtures
//!
//! A single `MockServer` plays both the central API and a fleet host.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use pulse_auth::{AUTH_CHECK_PATH, SIGN_IN_PATH};
use pulse_transport::PROBE_PATH;
use pulse_types::Host;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const EMAIL: &str = "ops@example.com";
pub const PASSWORD: &str = "hunter2";

/// Host identifier that routes probes to `server`.
pub fn host_of(server: &MockServer) -> Host {
    Host::new(server.address().to_string()).expect("socket address is a valid host")
}

/// Write a config file pointing the API at `api` and probing `hosts` over
/// plain HTTP. The database lives next to the config.
pub fn write_config(dir: &Path, api: &MockServer, token: &str, hosts: &[Host]) -> PathBuf {
    let hosts: Vec<String> = hosts.iter().map(|h| format!("\"{h}\"")).collect();
    let content = format!(
        r#"# written by the integration suite
[auth]
token = "{token}"
email = "{EMAIL}"
password = "{PASSWORD}"

[api]
base_url = "{api}"

[probe]
hosts = [{hosts}]
batch_size = 2
timeout_seconds = 1
scheme = "http"

[storage]
path = "{db}"
"#,
        api = api.uri(),
        hosts = hosts.join(", "),
        db = dir.join("results.db").display(),
    );
    let path = dir.join("config.toml");
    fs::write(&path, content).expect("write config");
    path
}

pub async fn mount_auth_check(server: &MockServer, token: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(AUTH_CHECK_PATH))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
        .mount(server)
        .await;
}

pub async fn mount_sign_in(server: &MockServer, response: ResponseTemplate, times: u64) {
    Mock::given(method("POST"))
        .and(path(SIGN_IN_PATH))
        .and(body_json(
            serde_json::json!({ "email": EMAIL, "password": PASSWORD }),
        ))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

/// Telemetry endpoint that answers only requests bearing `token`.
pub async fn mount_probe(server: &MockServer, token: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(PROBE_PATH))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .and(header("x-forwarded-host", "api.rpcm.cloud"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

pub fn token_body(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [token] }))
}
