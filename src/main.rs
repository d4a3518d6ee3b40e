use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use anki_bootstrap::config::SetupConfig;
use anki_bootstrap::setup::{Provisioner, SyncInputs};
use anki_bootstrap::sync::SyncKeyExchange;

#[derive(Parser)]
#[command(
    name = "anki-bootstrap",
    about = "First-run Anki provisioning for containers",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Anki configuration directory holding .local/share/Anki2
    #[arg(long, env = "CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// AnkiWeb email/username
    #[arg(long, env = "ANKIWEB_USER")]
    sync_user: Option<String>,

    /// AnkiWeb sync key (takes precedence over --sync-password)
    #[arg(long, env = "ANKIWEB_SYNC_KEY")]
    sync_key: Option<String>,

    /// AnkiWeb password, exchanged for a sync key at first run
    #[arg(long, env = "ANKIWEB_PASSWORD")]
    sync_password: Option<String>,

    /// Create a local-only profile and skip sync setup entirely
    #[arg(long)]
    no_sync: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ANKI_BOOTSTRAP_LOG")]
    log: Option<String>,

    /// Suppress progress output. Errors are still printed to stderr.
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full setup: profile, add-on install, add-on config
    /// (default when no subcommand given).
    ///
    /// Idempotent — an existing prefs21.db skips the whole run, so this
    /// is safe as a container entrypoint step.
    SetupAll,
    /// Create prefs21.db with AnkiWeb sync settings.
    ///
    /// Resolves the sync key from --sync-key, or by logging in with
    /// --sync-user/--sync-password. With --no-sync the profile is
    /// local-only.
    CreateProfile,
    /// Download and install the AnkiConnect add-on into addons21/.
    InstallAddon,
    /// Write AnkiConnect's config.json (bind address, port, CORS).
    ///
    /// Reads overrides from ANKICONNECT_BIND_ADDRESS,
    /// ANKICONNECT_BIND_PORT, ANKICONNECT_CORS_ORIGIN,
    /// ANKICONNECT_API_KEY, and ANKICONNECT_API_LOG_PATH.
    ConfigureAddon,
    /// Log in to AnkiWeb and print the sync key to stdout.
    ///
    /// Only the key is written to stdout, so the output can be captured
    /// directly in scripts:
    ///   SYNC_KEY=$(anki-bootstrap sync-key --user u@example.com --password pw)
    SyncKey {
        /// AnkiWeb email/username
        #[arg(long, env = "ANKIWEB_USER")]
        user: String,
        /// AnkiWeb password
        #[arg(long, env = "ANKIWEB_PASSWORD")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls. Logs go to stderr:
    // stdout is reserved for the sync-key output channel.
    let log_level = if args.quiet {
        "warn".to_string()
    } else {
        args.log.clone().unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = SetupConfig::new(args.config_dir.clone());

    if let Some(Command::SyncKey { user, password }) = &args.command {
        let exchange = SyncKeyExchange::new(config.sync.clone())?;
        let key = exchange.fetch_credential(user, password).await?;
        println!("{key}");
        return Ok(());
    }

    let inputs = SyncInputs {
        user: args.sync_user.clone().unwrap_or_default(),
        key: args.sync_key.clone().unwrap_or_default(),
        password: args.sync_password.clone(),
        no_sync: args.no_sync,
    };
    let provisioner = Provisioner::new(config);

    match args.command.unwrap_or(Command::SetupAll) {
        Command::SetupAll => provisioner.setup_all(&inputs).await?,
        Command::CreateProfile => {
            provisioner.create_profile(&inputs).await?;
        }
        Command::InstallAddon => provisioner.install_addon().await?,
        Command::ConfigureAddon => provisioner.configure_addon().await?,
        Command::SyncKey { .. } => unreachable!("handled above"),
    }

    Ok(())
}
