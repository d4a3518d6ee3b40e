//! First-run Anki provisioning for containers.
//!
//! Creates the `prefs21.db` profile database, logs in to AnkiWeb to
//! obtain a sync key, and installs + configures the AnkiConnect add-on.
//! Every operation is gated by an existence check so the whole pipeline
//! is safe to re-run on container start.

pub mod addon;
pub mod config;
pub mod profile;
pub mod setup;
pub mod sync;

pub use config::SetupConfig;
pub use setup::Provisioner;
pub use sync::{ExchangeError, SyncKeyExchange};
