//! Provisioning pipeline.
//!
//! `Provisioner` runs the individual setup stages — profile database,
//! add-on install, add-on configuration — and the combined `setup_all`
//! sequence. Every stage is existence-gated, so the pipeline is safe to
//! run on every container start.

use anyhow::{bail, Context as _, Result};
use tracing::info;

use crate::addon;
use crate::addon::installer::AddonInstaller;
use crate::config::SetupConfig;
use crate::profile::{self, ProfileOutcome, SyncSettings};
use crate::sync::SyncKeyExchange;

/// Sync inputs as supplied on the command line / environment. An explicit
/// key wins over a password; a password is traded for a key via the
/// hostKey exchange.
#[derive(Debug, Clone, Default)]
pub struct SyncInputs {
    pub user: String,
    pub key: String,
    pub password: Option<String>,
    /// Skip sync entirely and create a local-only profile.
    pub no_sync: bool,
}

pub struct Provisioner {
    config: SetupConfig,
}

impl Provisioner {
    pub fn new(config: SetupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    /// Create `prefs21.db`, resolving the sync key first if needed.
    pub async fn create_profile(&self, inputs: &SyncInputs) -> Result<ProfileOutcome> {
        // Resolution happens only when the database is actually missing —
        // no point logging in to AnkiWeb for a no-op.
        if self.config.prefs_db().exists() {
            info!(path = %self.config.prefs_db().display(), "profile already set up");
            return Ok(ProfileOutcome::AlreadyExists);
        }

        let settings = self.resolve_sync_settings(inputs).await?;
        profile::create_profile_db(
            &self.config.prefs_db(),
            &self.config.profile_name,
            &self.config.default_lang,
            &settings,
        )
        .await
    }

    /// Download and install the configured add-on.
    pub async fn install_addon(&self) -> Result<()> {
        let installer = AddonInstaller::new(self.config.addon.clone())?;
        installer.install(&self.config.addons_dir()).await?;
        Ok(())
    }

    /// Write the add-on's `config.json` with defaults + env overrides.
    pub async fn configure_addon(&self) -> Result<()> {
        addon::configure(
            &self.config.addons_dir(),
            self.config.addon.addon_id,
            &self.config.ankiconnect,
        )
        .await?;
        Ok(())
    }

    /// Run the full pipeline: profile, add-on install, add-on config.
    ///
    /// When the profile database already exists the whole run is treated
    /// as a completed previous setup and skipped.
    pub async fn setup_all(&self, inputs: &SyncInputs) -> Result<()> {
        if self.config.prefs_db().exists() {
            info!("setup already complete, skipping");
            return Ok(());
        }

        self.create_profile(inputs)
            .await
            .context("profile creation failed")?;
        self.install_addon().await.context("add-on install failed")?;
        self.configure_addon()
            .await
            .context("add-on configuration failed")?;

        info!("setup completed");
        Ok(())
    }

    /// Decide what sync settings the profile gets.
    ///
    /// Order: `--no-sync` → local-only; explicit key → use it; password →
    /// trade it for a key via the hostKey exchange; nothing → account
    /// recorded without a key. The sync endpoint itself is always written.
    async fn resolve_sync_settings(&self, inputs: &SyncInputs) -> Result<SyncSettings> {
        if inputs.no_sync {
            return Ok(SyncSettings::local_only(
                &self.config.sync.sync_url,
                self.config.sync.host_num,
            ));
        }

        let key = if !inputs.key.is_empty() {
            inputs.key.clone()
        } else if let Some(password) = inputs.password.as_deref().filter(|p| !p.is_empty()) {
            if inputs.user.is_empty() {
                bail!("a sync username is required when logging in with a password");
            }
            info!(user = %inputs.user, "retrieving sync key from AnkiWeb");
            let exchange = SyncKeyExchange::new(self.config.sync.clone())?;
            exchange
                .fetch_credential(&inputs.user, password)
                .await
                .context("failed to retrieve sync key from AnkiWeb")?
        } else {
            String::new()
        };

        Ok(SyncSettings {
            sync_user: inputs.user.clone(),
            sync_key: key,
            sync_url: self.config.sync.sync_url.clone(),
            host_num: self.config.sync.host_num,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provisioner(dir: &TempDir) -> Provisioner {
        Provisioner::new(SetupConfig::new(Some(dir.path().to_path_buf())))
    }

    #[tokio::test]
    async fn test_create_profile_no_sync() {
        let dir = TempDir::new().unwrap();
        let p = provisioner(&dir);
        let inputs = SyncInputs {
            no_sync: true,
            ..Default::default()
        };
        assert_eq!(p.create_profile(&inputs).await.unwrap(), ProfileOutcome::Created);
        assert!(p.config().prefs_db().exists());

        // Re-run is a no-op.
        assert_eq!(
            p.create_profile(&inputs).await.unwrap(),
            ProfileOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_explicit_key_skips_exchange() {
        let dir = TempDir::new().unwrap();
        let p = provisioner(&dir);
        // No server is running anywhere — an explicit key must not need one.
        let inputs = SyncInputs {
            user: "user@example.com".to_string(),
            key: "ABCD1234EFGH5678".to_string(),
            ..Default::default()
        };
        assert_eq!(p.create_profile(&inputs).await.unwrap(), ProfileOutcome::Created);
    }

    #[tokio::test]
    async fn test_password_without_user_fails() {
        let dir = TempDir::new().unwrap();
        let p = provisioner(&dir);
        let inputs = SyncInputs {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let err = p.create_profile(&inputs).await.unwrap_err();
        assert!(err.to_string().contains("username is required"));
        assert!(!p.config().prefs_db().exists());
    }

    #[tokio::test]
    async fn test_setup_all_skips_when_profile_exists() {
        let dir = TempDir::new().unwrap();
        let p = provisioner(&dir);
        let inputs = SyncInputs {
            no_sync: true,
            ..Default::default()
        };
        p.create_profile(&inputs).await.unwrap();

        // Would otherwise hit the network for the add-on download.
        p.setup_all(&inputs).await.unwrap();
    }
}
