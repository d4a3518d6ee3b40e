//! CLI tests: argument surface, exit codes, and the stdout credential
//! channel contract (key only, diagnostics on stderr).

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "ABCD1234EFGH5678";

fn bootstrap() -> Command {
    let mut cmd = Command::cargo_bin("anki-bootstrap").expect("binary builds");
    // Ambient operator configuration must not leak into tests.
    for var in [
        "CONFIG_DIR",
        "ANKIWEB_USER",
        "ANKIWEB_PASSWORD",
        "ANKIWEB_SYNC_KEY",
        "ANKIWEB_HOST_KEY_URL",
        "ANKI_LANG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_key_prints_only_the_key() {
    let server = MockServer::start().await;
    let body = zstd::bulk::compress(json!({ "key": KEY }).to_string().as_bytes(), 0).unwrap();
    Mock::given(method("POST"))
        .and(path("/sync/hostKey"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    bootstrap()
        .env("ANKIWEB_HOST_KEY_URL", format!("{}/sync/hostKey", server.uri()))
        .args(["sync-key", "--user", "user@example.com", "--password", "hunter2"])
        .assert()
        .success()
        .stdout(format!("{KEY}\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_key_failure_exits_nonzero_with_clean_stdout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    bootstrap()
        .env("ANKIWEB_HOST_KEY_URL", format!("{}/sync/hostKey", server.uri()))
        .args(["sync-key", "--user", "user@example.com", "--password", "wrong"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("403"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_key_rejected_credentials_exit_nonzero() {
    let server = MockServer::start().await;
    let body =
        zstd::bulk::compress(json!({ "msg": "invalid credentials" }).to_string().as_bytes(), 0)
            .unwrap();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    bootstrap()
        .env("ANKIWEB_HOST_KEY_URL", format!("{}/sync/hostKey", server.uri()))
        .args(["sync-key", "--user", "user@example.com", "--password", "wrong"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("no credential"));
}

#[test]
fn create_profile_no_sync_is_idempotent() {
    let dir = TempDir::new().unwrap();

    bootstrap()
        .args(["--config-dir", dir.path().to_str().unwrap(), "--no-sync", "create-profile"])
        .assert()
        .success();
    assert!(dir.path().join(".local/share/Anki2/prefs21.db").exists());

    bootstrap()
        .args(["--config-dir", dir.path().to_str().unwrap(), "--no-sync", "create-profile"])
        .assert()
        .success();
}

#[test]
fn configure_addon_without_install_fails() {
    let dir = TempDir::new().unwrap();
    bootstrap()
        .args(["--config-dir", dir.path().to_str().unwrap(), "configure-addon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not installed"));
}

#[test]
fn help_lists_all_actions() {
    bootstrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("setup-all")
                .and(predicate::str::contains("create-profile"))
                .and(predicate::str::contains("install-addon"))
                .and(predicate::str::contains("configure-addon"))
                .and(predicate::str::contains("sync-key")),
        );
}
