//! Integration tests for add-on download, extraction, and the full
//! provisioning pipeline against a mock AnkiWeb.

use std::io::Write;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use anki_bootstrap::addon::installer::{AddonInstaller, InstallOutcome};
use anki_bootstrap::config::{AddonConfig, SetupConfig};
use anki_bootstrap::setup::{Provisioner, SyncInputs};

const ADDON_ID: u64 = 2055492159;

fn build_addon_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn ankiconnect_zip() -> Vec<u8> {
    build_addon_zip(&[
        (
            "manifest.json",
            r#"{"name": "AnkiConnect", "homepage": "https://example.net/ankiconnect"}"#,
        ),
        ("__init__.py", "# AnkiConnect entry point"),
        ("plugin/web.py", "PORT = 8765"),
    ])
}

/// Mount the shared download endpoint: a redirect carrying install
/// metadata in its query, then the zip itself.
async fn mount_download(server: &MockServer, zip: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/download/{ADDON_ID}")))
        .and(query_param("v", "2.1"))
        .and(query_param("p", "241103"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "location",
            format!("{}/dl/final?t=1700000000&minpt=231000&maxpt=0&bidx=2", server.uri()).as_str(),
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dl/final"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=AnkiConnect.ankiaddon")
                .set_body_bytes(zip),
        )
        .mount(server)
        .await;
}

fn addon_config(server: &MockServer) -> AddonConfig {
    AddonConfig {
        shared_base_url: server.uri(),
        ..AddonConfig::default()
    }
}

#[tokio::test]
async fn installs_addon_and_writes_meta() {
    let server = MockServer::start().await;
    mount_download(&server, ankiconnect_zip()).await;

    let dir = TempDir::new().unwrap();
    let installer = AddonInstaller::new(addon_config(&server)).unwrap();
    let outcome = installer.install(dir.path()).await.unwrap();

    let folder = dir.path().join(ADDON_ID.to_string());
    assert_eq!(outcome, InstallOutcome::Installed(folder.clone()));
    assert!(folder.join("__init__.py").exists());
    assert!(folder.join("plugin/web.py").exists());

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(folder.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["name"], "AnkiConnect");
    assert_eq!(meta["mod"], 1700000000_i64);
    assert_eq!(meta["min_point_version"], 231000);
    assert_eq!(meta["branch_index"], 2);
    assert_eq!(meta["disabled"], false);
    assert_eq!(meta["homepage"], "https://example.net/ankiconnect");
}

#[tokio::test]
async fn reinstall_is_skipped() {
    let server = MockServer::start().await;
    mount_download(&server, ankiconnect_zip()).await;

    let dir = TempDir::new().unwrap();
    let installer = AddonInstaller::new(addon_config(&server)).unwrap();
    installer.install(dir.path()).await.unwrap();

    let outcome = installer.install(dir.path()).await.unwrap();
    assert_eq!(
        outcome,
        InstallOutcome::AlreadyInstalled(dir.path().join(ADDON_ID.to_string()))
    );
    // Only the first install touched the network.
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn download_failure_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let installer = AddonInstaller::new(addon_config(&server)).unwrap();
    let err = installer.install(dir.path()).await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    // Nothing half-installed on disk.
    assert!(!dir.path().join(ADDON_ID.to_string()).exists());
}

#[tokio::test]
async fn addon_without_manifest_gets_generated_name() {
    let server = MockServer::start().await;
    mount_download(&server, build_addon_zip(&[("__init__.py", "")])).await;

    let dir = TempDir::new().unwrap();
    let installer = AddonInstaller::new(addon_config(&server)).unwrap();
    installer.install(dir.path()).await.unwrap();

    let folder = dir.path().join(ADDON_ID.to_string());
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(folder.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["name"], format!("Addon {ADDON_ID}"));
}

#[tokio::test]
async fn setup_all_provisions_profile_addon_and_config() {
    let server = MockServer::start().await;
    mount_download(&server, ankiconnect_zip()).await;

    let dir = TempDir::new().unwrap();
    let mut config = SetupConfig::new(Some(dir.path().to_path_buf()));
    config.addon.shared_base_url = server.uri();

    let provisioner = Provisioner::new(config);
    let inputs = SyncInputs {
        user: "user@example.com".to_string(),
        key: "ABCD1234EFGH5678".to_string(),
        ..Default::default()
    };
    provisioner.setup_all(&inputs).await.unwrap();

    let anki2 = dir.path().join(".local/share/Anki2");
    assert!(anki2.join("prefs21.db").exists());
    let addon_folder = anki2.join("addons21").join(ADDON_ID.to_string());
    assert!(addon_folder.join("__init__.py").exists());
    assert!(addon_folder.join("meta.json").exists());

    let cfg: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(addon_folder.join("config.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(cfg["webBindPort"], 8765);

    // Second run short-circuits on the existing profile DB.
    provisioner.setup_all(&inputs).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
