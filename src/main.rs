// ABOUTME: Entry point for the jumpgate CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use jumpgate::config::{self, Config};
use jumpgate::credentials::FileStore;
use jumpgate::error::{Error, Result};
use jumpgate::server::{Listener, load_or_generate_host_key};
use jumpgate::types::Fingerprint;
use russh::keys::ssh_key::PublicKey;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn,jumpgate=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, force)?;
            println!("Created {}", config::CONFIG_FILENAME);
            Ok(())
        }
        Commands::Serve { config } => {
            let config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::discover(&env::current_dir()?)?,
            };
            serve(config).await
        }
        Commands::Fingerprint { key } => {
            println!("{}", fingerprint(&key)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let store = FileStore::load(&config.credentials)?;
    info!(
        targets = store.target_count(),
        acl_entries = store.acl_len(),
        "Loaded credentials"
    );
    let host_key = load_or_generate_host_key(&config.host_key)?;
    info!(fingerprint = %Fingerprint::of(host_key.public_key()), "Bastion host key");

    let listener = Listener::from_config(&config, host_key, Arc::new(store)).await?;

    tokio::select! {
        result = listener.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

fn fingerprint(path: &Path) -> Result<Fingerprint> {
    let content = std::fs::read_to_string(path)?;
    let key = PublicKey::from_openssh(content.trim()).map_err(|e| Error::PublicKey(e.to_string()))?;
    Ok(Fingerprint::of(&key))
}
