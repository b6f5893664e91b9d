//! Integration tests for the `lrsc-bridge` binary.
//!
//! Everything here stops before any network connection is made: argument
//! parsing, configuration and credential errors, and `check-config`.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const SERVICES: &str = r#"{"iotf-service":[{"credentials":{
    "apiKey":"a-org-key","apiToken":"token","org":"org",
    "base_uri":"https://internetofthings.ibmcloud.com/api/v0001",
    "mqtt_host":"org.messaging.internetofthings.ibmcloud.com",
    "mqtt_s_port":8883,"mqtt_u_port":1883}}]}"#;

// ── Helpers ─────────────────────────────────────────────────────────

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Build a command with env isolation: no ambient credentials, no user
/// config directory.
fn bridge_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("lrsc-bridge");
    cmd.env("HOME", "/tmp/lrsc-bridge-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/lrsc-bridge-test-nonexistent")
        .env_remove("VCAP_SERVICES")
        .env_remove("CLIENT_CERT")
        .env_remove("CLIENT_KEY")
        .env_remove("PORT")
        .env_remove("LRSC_BRIDGE_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

/// A scratch directory holding a config file and a services file.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bridge.toml"), config).unwrap();
        std::fs::write(dir.path().join("services.json"), SERVICES).unwrap();
        Self { dir }
    }

    fn with_certificates() -> Self {
        Self::new(&format!(
            "[device]\nclient_cert = {:?}\nclient_key = {:?}\n",
            fixture("client.crt"),
            fixture("client.key"),
        ))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = bridge_cmd();
        cmd.arg("--config")
            .arg(self.path("bridge.toml"))
            .arg("--services-file")
            .arg(self.path("services.json"));
        cmd
    }
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    bridge_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("LRSC")
            .and(predicate::str::contains("check-config"))
            .and(predicate::str::contains("--services-file")),
    );
}

#[test]
fn test_version_flag() {
    bridge_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("lrsc-bridge"));
}

#[test]
fn test_unknown_log_format_is_a_usage_error() {
    bridge_cmd()
        .args(["--log-format", "xml", "check-config"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("xml"));
}

// ── Credentials ─────────────────────────────────────────────────────

#[test]
fn test_missing_credentials_exit_code() {
    let ws = Workspace::with_certificates();
    bridge_cmd()
        .arg("--config")
        .arg(ws.path("bridge.toml"))
        .arg("check-config")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("VCAP_SERVICES"));
}

#[test]
fn test_empty_service_binding_exit_code() {
    let ws = Workspace::with_certificates();
    bridge_cmd()
        .arg("--config")
        .arg(ws.path("bridge.toml"))
        .arg("check-config")
        .env("VCAP_SERVICES", "{}")
        .assert()
        .code(3)
        .stderr(predicate::str::contains(
            "Could not find any iotf-service instance bound",
        ));
}

#[test]
fn test_unparseable_service_binding_exit_code() {
    let ws = Workspace::with_certificates();
    std::fs::write(ws.path("services.json"), "not json").unwrap();
    ws.cmd()
        .arg("check-config")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Could not parse services JSON"));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_missing_certificate_paths_exit_code() {
    let ws = Workspace::new("");
    ws.cmd()
        .arg("check-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("device.client_cert"));
}

#[test]
fn test_malformed_config_file_exit_code() {
    let ws = Workspace::new("[device]\nport = \"many\"\n");
    ws.cmd().arg("check-config").assert().code(2);
}

#[test]
fn test_environment_overrides_config_file() {
    let ws = Workspace::with_certificates();
    ws.cmd()
        .arg("check-config")
        .env("LRSC_BRIDGE_DEVICE__HOST", "lrsc.example.net")
        .assert()
        .success()
        .stdout(predicate::str::contains("lrsc.example.net:55055"));
}

// ── TLS material ────────────────────────────────────────────────────

#[test]
fn test_unreadable_certificate_exit_code() {
    let ws = Workspace::new("[device]\nclient_cert = \"/nonexistent/client.crt\"\nclient_key = \"/nonexistent/client.key\"\n");
    ws.cmd()
        .arg("check-config")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("/nonexistent/client.crt"));
}

#[test]
fn test_long_paths_stay_on_one_line() {
    let cert = format!("/nonexistent/{}/client.crt", "certificates".repeat(8));
    let ws = Workspace::new(&format!(
        "[device]\nclient_cert = {cert:?}\nclient_key = \"/nonexistent/client.key\"\n"
    ));
    ws.cmd()
        .arg("check-config")
        .assert()
        .code(4)
        .stderr(predicate::str::contains(cert));
}

#[test]
fn test_run_refuses_to_start_without_usable_certificate() {
    let ws = Workspace::new("[device]\nclient_cert = \"/nonexistent/client.crt\"\nclient_key = \"/nonexistent/client.key\"\n\n[status]\nbind = \"127.0.0.1\"\n");
    ws.cmd().args(["run", "--port", "0"]).assert().code(4);
}

#[test]
fn test_certificate_from_legacy_variables() {
    let ws = Workspace::new("");
    ws.cmd()
        .arg("check-config")
        .env("CLIENT_CERT", fixture("client.crt"))
        .env("CLIENT_KEY", fixture("client.key"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"));
}

// ── check-config ────────────────────────────────────────────────────

#[test]
fn test_check_config_reports_endpoints() {
    let ws = Workspace::with_certificates();
    ws.cmd().arg("check-config").assert().success().stdout(
        predicate::str::contains("dev.lrsc.ch:55055")
            .and(predicate::str::contains(
                "org.messaging.internetofthings.ibmcloud.com:8883",
            ))
            .and(predicate::str::contains("/organizations/org/devices"))
            .and(predicate::str::contains("Configuration OK")),
    );
}

#[test]
fn test_check_config_print_renders_toml() {
    let ws = Workspace::with_certificates();
    ws.cmd()
        .args(["check-config", "--print"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[device]")
                .and(predicate::str::contains("device_type = \"LRSC\"")),
        );
}
