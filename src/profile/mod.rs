//! Profile database creation.
//!
//! Anki keeps its profile list in `prefs21.db`, a SQLite database with a
//! single `profiles` table mapping a profile name to a Python-pickled
//! blob. Both the `_global` record and the user profile record are
//! written here so a freshly started container boots straight into a
//! configured profile without the first-run wizard.

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Whether the database was written or already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    Created,
    AlreadyExists,
}

/// Sync settings embedded in the user profile record.
///
/// A local-only profile carries empty `sync_user`/`sync_key` but still
/// records the sync endpoint, matching what Anki's own first run writes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync_user: String,
    pub sync_key: String,
    pub sync_url: String,
    pub host_num: u32,
}

impl SyncSettings {
    /// Settings for a profile with no account attached.
    pub fn local_only(sync_url: &str, host_num: u32) -> Self {
        Self {
            sync_user: String::new(),
            sync_key: String::new(),
            sync_url: sync_url.to_string(),
            host_num,
        }
    }
}

// Field names must match what Anki's profile manager unpickles, hence the
// mixed snake/camel casing.

#[derive(Serialize)]
struct GlobalRecord<'a> {
    last_loaded_profile: &'a str,
    #[serde(rename = "defaultLang")]
    default_lang: &'a str,
    #[serde(rename = "firstRun")]
    first_run: bool,
}

#[derive(Serialize)]
struct ProfileRecord<'a> {
    #[serde(rename = "syncUser")]
    sync_user: &'a str,
    #[serde(rename = "syncKey")]
    sync_key: &'a str,
    #[serde(rename = "currentSyncUrl")]
    current_sync_url: &'a str,
    #[serde(rename = "hostNum")]
    host_num: u32,
    #[serde(rename = "autoSync")]
    auto_sync: bool,
    #[serde(rename = "syncMedia")]
    sync_media: bool,
}

/// Create `prefs21.db` with a `_global` record and one user profile.
///
/// No-op when the database already exists — an existing profile is never
/// overwritten. `autoSync`/`syncMedia` are enabled iff a sync key is set.
pub async fn create_profile_db(
    prefs_db: &Path,
    profile_name: &str,
    default_lang: &str,
    sync: &SyncSettings,
) -> Result<ProfileOutcome> {
    if prefs_db.exists() {
        info!(path = %prefs_db.display(), "profile database already exists");
        return Ok(ProfileOutcome::AlreadyExists);
    }

    if let Some(parent) = prefs_db.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // Anki owns this file's format — plain journal mode, no WAL.
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", prefs_db.display()))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts)
        .await
        .with_context(|| format!("failed to open {}", prefs_db.display()))?;

    let result = write_records(&pool, profile_name, default_lang, sync).await;
    pool.close().await;
    result?;

    info!(path = %prefs_db.display(), profile = profile_name, "profile database created");
    Ok(ProfileOutcome::Created)
}

async fn write_records(
    pool: &SqlitePool,
    profile_name: &str,
    default_lang: &str,
    sync: &SyncSettings,
) -> Result<()> {
    sqlx::query(
        "CREATE TABLE profiles (
            name TEXT PRIMARY KEY COLLATE NOCASE,
            data BLOB NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("failed to create profiles table")?;

    let global = GlobalRecord {
        last_loaded_profile: profile_name,
        default_lang,
        first_run: false,
    };
    insert_record(pool, "_global", &pickle(&global)?).await?;
    debug!("wrote _global profile record");

    // The sync endpoint is always recorded; only user/key vary with the
    // account state.
    let has_key = !sync.sync_key.is_empty();
    let profile = ProfileRecord {
        sync_user: &sync.sync_user,
        sync_key: &sync.sync_key,
        current_sync_url: &sync.sync_url,
        host_num: sync.host_num,
        auto_sync: has_key,
        sync_media: has_key,
    };
    insert_record(pool, profile_name, &pickle(&profile)?).await?;
    debug!(profile = profile_name, auto_sync = has_key, "wrote user profile record");

    Ok(())
}

async fn insert_record(pool: &SqlitePool, name: &str, blob: &[u8]) -> Result<()> {
    sqlx::query("INSERT INTO profiles (name, data) VALUES (?, ?)")
        .bind(name)
        .bind(blob)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert profile record '{name}'"))?;
    Ok(())
}

fn pickle<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    serde_pickle::to_vec(record, serde_pickle::SerOptions::new())
        .context("failed to pickle profile record")
}
