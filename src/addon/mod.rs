//! AnkiConnect add-on management.
//!
//! `installer` downloads the `.ankiaddon` package from AnkiWeb shared and
//! extracts it into `addons21/<id>/`. This module writes the add-on's
//! `config.json` so the AnkiConnect HTTP API is reachable from outside
//! the container.

pub mod installer;

use anyhow::{bail, Context as _, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::AnkiConnectOverrides;

/// Write AnkiConnect's `config.json`.
///
/// Merge order, lowest to highest: keys already present in an existing
/// `config.json` (only those outside our defaults survive), built-in
/// defaults, operator overrides. Returns the written path.
///
/// Fails if the add-on directory does not exist — configuration without
/// an installed add-on is a pipeline ordering bug.
pub async fn configure(
    addons_dir: &Path,
    addon_id: u64,
    overrides: &AnkiConnectOverrides,
) -> Result<PathBuf> {
    let addon_folder = addons_dir.join(addon_id.to_string());
    if !addon_folder.exists() {
        bail!("add-on {addon_id} is not installed at {}", addon_folder.display());
    }
    let config_path = addon_folder.join("config.json");

    let mut config = read_existing(&config_path).await;

    let defaults = default_config();
    for (key, value) in defaults {
        config.insert(key, value);
    }

    apply_overrides(&mut config, overrides);

    let text = serde_json::to_string_pretty(&Value::Object(config))
        .context("failed to encode AnkiConnect config")?;
    tokio::fs::write(&config_path, text)
        .await
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    info!(path = %config_path.display(), "AnkiConnect configured");
    Ok(config_path)
}

/// AnkiConnect defaults for container use: bind on all interfaces, allow
/// any origin. Operators lock this down via `ANKICONNECT_*` overrides.
fn default_config() -> Map<String, Value> {
    let Value::Object(map) = json!({
        "apiKey": null,
        "apiLogPath": null,
        "ignoreOriginList": [],
        "webBindAddress": "0.0.0.0",
        "webBindPort": 8765,
        "webCorsOrigin": "http://localhost",
        "webCorsOriginList": ["*"],
    }) else {
        unreachable!("default config literal is an object")
    };
    map
}

async fn read_existing(config_path: &Path) -> Map<String, Value> {
    match tokio::fs::read_to_string(config_path).await {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => {
                debug!(path = %config_path.display(), "loaded existing AnkiConnect config");
                map
            }
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    }
}

fn apply_overrides(config: &mut Map<String, Value>, overrides: &AnkiConnectOverrides) {
    if let Some(addr) = &overrides.bind_address {
        config.insert("webBindAddress".to_string(), json!(addr));
    }
    if let Some(port) = overrides.bind_port {
        config.insert("webBindPort".to_string(), json!(port));
    }
    if let Some(origins) = &overrides.cors_origin_list {
        config.insert("webCorsOriginList".to_string(), json!(origins));
    }
    if let Some(key) = &overrides.api_key {
        config.insert("apiKey".to_string(), json!(key));
    }
    if let Some(path) = &overrides.api_log_path {
        config.insert("apiLogPath".to_string(), json!(path));
    }
}
