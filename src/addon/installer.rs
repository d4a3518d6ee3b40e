//! Add-on download and extraction.

use anyhow::{bail, Context as _, Result};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AddonConfig, ANKI_VERSION};

/// Result of an install attempt, pointing at the add-on folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(PathBuf),
    AlreadyInstalled(PathBuf),
}

/// A downloaded `.ankiaddon` package plus the install metadata AnkiWeb
/// encodes in the redirect URL's query string.
pub struct DownloadedAddon {
    pub data: Vec<u8>,
    pub filename: String,
    pub mod_time: i64,
    pub min_point_version: i64,
    pub max_point_version: i64,
    pub branch_index: i64,
}

/// Downloads and installs an add-on package from AnkiWeb shared.
pub struct AddonInstaller {
    config: AddonConfig,
    client: reqwest::Client,
}

impl AddonInstaller {
    pub fn new(config: AddonConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    /// Download the configured add-on and extract it into
    /// `{addons_dir}/{id}/`, writing `meta.json` alongside.
    ///
    /// No-op when the add-on folder already exists.
    pub async fn install(&self, addons_dir: &Path) -> Result<InstallOutcome> {
        let addon_id = self.config.addon_id;
        let addon_folder = addons_dir.join(addon_id.to_string());

        if addon_folder.exists() {
            info!(path = %addon_folder.display(), "add-on already installed");
            return Ok(InstallOutcome::AlreadyInstalled(addon_folder));
        }

        let download = self.download().await?;
        let manifest = read_manifest(&download.data);
        let addon_name = manifest
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Addon {addon_id}"));
        debug!(name = %addon_name, file = %download.filename, "extracting add-on");

        tokio::fs::create_dir_all(&addon_folder)
            .await
            .with_context(|| format!("failed to create {}", addon_folder.display()))?;

        // A half-extracted folder must not look like a finished install to
        // the next run — clean it up before surfacing the error.
        if let Err(e) = finalize(&addon_folder, &addon_name, &download, &manifest).await {
            let _ = tokio::fs::remove_dir_all(&addon_folder).await;
            return Err(e);
        }

        info!(path = %addon_folder.display(), name = %addon_name, "add-on installed");
        Ok(InstallOutcome::Installed(addon_folder))
    }

    /// Fetch the package. AnkiWeb answers with a redirect whose final URL
    /// carries install metadata (`t`, `minpt`, `maxpt`, `bidx`) in its query.
    pub async fn download(&self) -> Result<DownloadedAddon> {
        let url = format!(
            "{}/download/{}?v={}&p={}",
            self.config.shared_base_url, self.config.addon_id, ANKI_VERSION, self.config.int_version
        );
        debug!(url = %url, "downloading add-on");

        let resp = self.client.get(&url).send().await.context("add-on download failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("add-on download failed: HTTP {status}");
        }

        let filename = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("attachment; filename="))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.ankiaddon", self.config.addon_id));

        let final_url = resp.url().clone();
        let data = resp.bytes().await.context("failed to read add-on package")?;
        debug!(file = %filename, bytes = data.len(), "add-on downloaded");

        Ok(DownloadedAddon {
            data: data.to_vec(),
            filename,
            mod_time: query_i64(&final_url, "t"),
            min_point_version: query_i64(&final_url, "minpt"),
            max_point_version: query_i64(&final_url, "maxpt"),
            branch_index: query_i64(&final_url, "bidx"),
        })
    }
}

fn query_i64(url: &reqwest::Url, key: &str) -> i64 {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

/// Read `manifest.json` from the package. Packages without one (or with a
/// broken one) install under a generated name.
fn read_manifest(zip_data: &[u8]) -> Value {
    let reader = std::io::Cursor::new(zip_data);
    let Ok(mut archive) = zip::ZipArchive::new(reader) else {
        return json!({});
    };
    let Ok(mut file) = archive.by_name("manifest.json") else {
        return json!({});
    };
    let mut text = String::new();
    if file.read_to_string(&mut text).is_err() {
        return json!({});
    }
    serde_json::from_str(&text).unwrap_or_else(|_| json!({}))
}

async fn finalize(
    addon_folder: &Path,
    addon_name: &str,
    download: &DownloadedAddon,
    manifest: &Value,
) -> Result<()> {
    let data = download.data.clone();
    let dest = addon_folder.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip(&data, &dest))
        .await
        .context("extraction task panicked")??;
    write_meta(addon_folder, addon_name, download, manifest).await
}

/// Extract every file entry into `dest`, refusing paths that escape it.
fn extract_zip(zip_data: &[u8], dest: &Path) -> Result<()> {
    let reader = std::io::Cursor::new(zip_data);
    let mut archive = zip::ZipArchive::new(reader).context("add-on package is not a valid zip")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("corrupt zip entry")?;
        if file.is_dir() {
            continue;
        }
        let Some(relative) = file.enclosed_name() else {
            bail!("zip entry '{}' escapes the install directory", file.name());
        };
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = std::fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        std::io::copy(&mut file, &mut out)
            .with_context(|| format!("failed to extract {}", target.display()))?;
        debug!(entry = %target.display(), "extracted");
    }
    Ok(())
}

/// Write `meta.json` in the format Anki's add-on manager expects.
async fn write_meta(
    addon_folder: &Path,
    addon_name: &str,
    download: &DownloadedAddon,
    manifest: &Value,
) -> Result<()> {
    let mut meta = json!({
        "name": addon_name,
        "mod": download.mod_time,
        "min_point_version": download.min_point_version,
        "max_point_version": download.max_point_version,
        "branch_index": download.branch_index,
        "disabled": false,
    });

    // Carry optional manifest metadata over into meta.json.
    for key in ["conflicts", "homepage"] {
        if let Some(value) = manifest.get(key) {
            meta[key] = value.clone();
        }
    }

    let path = addon_folder.join("meta.json");
    let text = serde_json::to_string_pretty(&meta).context("failed to encode meta.json")?;
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
