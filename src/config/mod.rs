use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_CONFIG_DIR: &str = "/config";
const DEFAULT_PROFILE_NAME: &str = "user";
const DEFAULT_LANG: &str = "en_US";
const DEFAULT_HOST_KEY_URL: &str = "https://sync21.ankiweb.net/sync/hostKey";
const DEFAULT_SYNC_URL: &str = "https://sync21.ankiweb.net/";
const DEFAULT_SHARED_URL: &str = "https://ankiweb.net/shared";
const DEFAULT_CLIENT_ID: &str = "anki,24.11.3 (dev),linux";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_DECOMPRESSED_BYTES: u64 = 10 * 1024 * 1024;

/// Sync protocol version AnkiWeb expects in the `anki-sync` header.
pub const SYNC_PROTOCOL_VERSION: u32 = 11;

/// AnkiWeb host number recorded in the profile (sync21 shard).
pub const DEFAULT_HOST_NUM: u32 = 21;

/// AnkiConnect add-on id on AnkiWeb shared.
pub const ANKICONNECT_ADDON_ID: u64 = 2055492159;

/// Anki major version sent with add-on download requests.
pub const ANKI_VERSION: &str = "2.1";

/// Anki's integer version format: year * 10_000 + month * 100 + patch.
pub fn int_version(year: u32, month: u32, patch: u32) -> u32 {
    year * 10_000 + month * 100 + patch
}

fn default_int_version() -> u32 {
    int_version(24, 11, 3)
}

// ─── SyncConfig ───────────────────────────────────────────────────────────────

/// Sync endpoint configuration (`[sync]` in anki-bootstrap.toml).
///
/// These were hard-coded constants in earlier revisions; they are explicit
/// fields so a relocated sync shard or a changed client string can be
/// configured without touching call sites.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// hostKey login endpoint (default: `https://sync21.ankiweb.net/sync/hostKey`).
    pub host_key_url: String,
    /// Base sync URL recorded in the profile (default: `https://sync21.ankiweb.net/`).
    pub sync_url: String,
    /// Client identifier sent in the `anki-sync` header.
    pub client_id: String,
    /// Request timeout in seconds (default: 30).
    pub timeout_secs: u64,
    /// Cap on the decompressed response size (default: 10 MiB).
    /// Responses expanding past this bound are rejected.
    pub max_decompressed_bytes: u64,
    /// Host number stored in the profile record (default: 21).
    pub host_num: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host_key_url: DEFAULT_HOST_KEY_URL.to_string(),
            sync_url: DEFAULT_SYNC_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
            host_num: DEFAULT_HOST_NUM,
        }
    }
}

// ─── AddonConfig ──────────────────────────────────────────────────────────────

/// Add-on download configuration (`[addon]` in anki-bootstrap.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AddonConfig {
    /// AnkiWeb shared base URL (default: `https://ankiweb.net/shared`).
    pub shared_base_url: String,
    /// Add-on id to install (default: AnkiConnect, 2055492159).
    pub addon_id: u64,
    /// Anki point version reported to the download endpoint.
    pub int_version: u32,
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            shared_base_url: DEFAULT_SHARED_URL.to_string(),
            addon_id: ANKICONNECT_ADDON_ID,
            int_version: default_int_version(),
        }
    }
}

// ─── AnkiConnect overrides ───────────────────────────────────────────────────

/// Operator overrides for AnkiConnect's `config.json`, read from
/// `ANKICONNECT_*` environment variables. `None` keeps the built-in default.
#[derive(Debug, Clone, Default)]
pub struct AnkiConnectOverrides {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    pub cors_origin_list: Option<Vec<String>>,
    pub api_key: Option<String>,
    pub api_log_path: Option<String>,
}

impl AnkiConnectOverrides {
    /// Read overrides from the environment.
    ///
    /// `ANKICONNECT_CORS_ORIGIN` accepts either a JSON array of origins or
    /// a single origin string.
    pub fn from_env() -> Self {
        let bind_port = match std::env::var("ANKICONNECT_BIND_PORT") {
            Ok(s) => match s.parse() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!(value = %s, "ignoring non-numeric ANKICONNECT_BIND_PORT");
                    None
                }
            },
            Err(_) => None,
        };

        let cors_origin_list = std::env::var("ANKICONNECT_CORS_ORIGIN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| serde_json::from_str::<Vec<String>>(&s).unwrap_or_else(|_| vec![s]));

        Self {
            bind_address: env_nonempty("ANKICONNECT_BIND_ADDRESS"),
            bind_port,
            cors_origin_list,
            api_key: env_nonempty("ANKICONNECT_API_KEY"),
            api_log_path: env_nonempty("ANKICONNECT_API_LOG_PATH"),
        }
    }
}

// ─── SetupConfig ──────────────────────────────────────────────────────────────

/// Full provisioning configuration.
///
/// Priority (highest to lowest):
///   1. CLI / env — passed as `Some(value)` from clap
///   2. TOML file at `{config_dir}/anki-bootstrap.toml`
///   3. Built-in defaults
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Container config directory holding `.local/share/Anki2` (default: `/config`).
    pub config_dir: PathBuf,
    /// Profile record name inside prefs21.db (default: `"user"`).
    pub profile_name: String,
    /// Interface language written to the `_global` record (`ANKI_LANG`, default: `en_US`).
    pub default_lang: String,
    pub sync: SyncConfig,
    pub addon: AddonConfig,
    pub ankiconnect: AnkiConnectOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    profile_name: Option<String>,
    default_lang: Option<String>,
    sync: Option<SyncConfig>,
    addon: Option<AddonConfig>,
}

impl SetupConfig {
    /// Build config from CLI/env args + optional TOML file.
    pub fn new(config_dir: Option<PathBuf>) -> Self {
        let config_dir = config_dir
            .or_else(|| std::env::var("CONFIG_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

        let toml = load_toml(&config_dir).unwrap_or_default();

        let profile_name = toml
            .profile_name
            .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());

        let default_lang = env_nonempty("ANKI_LANG")
            .or(toml.default_lang)
            .unwrap_or_else(|| DEFAULT_LANG.to_string());

        let mut sync = toml.sync.unwrap_or_default();
        if let Some(url) = env_nonempty("ANKIWEB_HOST_KEY_URL") {
            sync.host_key_url = url;
        }
        if let Some(url) = env_nonempty("ANKIWEB_SYNC_URL") {
            sync.sync_url = url;
        }

        let mut addon = toml.addon.unwrap_or_default();
        if let Some(url) = env_nonempty("ANKIWEB_SHARED_URL") {
            addon.shared_base_url = url;
        }

        Self {
            config_dir,
            profile_name,
            default_lang,
            sync,
            addon,
            ankiconnect: AnkiConnectOverrides::from_env(),
        }
    }

    /// `{config_dir}/.local/share/Anki2` — Anki's data directory.
    pub fn anki2_dir(&self) -> PathBuf {
        self.config_dir.join(".local").join("share").join("Anki2")
    }

    /// Path of the profile database.
    pub fn prefs_db(&self) -> PathBuf {
        self.anki2_dir().join("prefs21.db")
    }

    /// Path of the 2.1.x add-on directory.
    pub fn addons_dir(&self) -> PathBuf {
        self.anki2_dir().join("addons21")
    }
}

fn load_toml(config_dir: &Path) -> Option<TomlConfig> {
    let path = config_dir.join("anki-bootstrap.toml");
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!(path = %path.display(), "invalid anki-bootstrap.toml, ignoring: {e}");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), "could not read anki-bootstrap.toml: {e}");
            None
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}
