// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jumpgate")]
#[command(about = "SSH bastion that relays callers to pinned targets")]
#[command(version)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new jumpgate.yml and credentials file
    Init {
        /// Overwrite an existing jumpgate.yml
        #[arg(long)]
        force: bool,
    },

    /// Accept callers and relay them to their targets
    Serve {
        /// Config file (default: discovered in the current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the SHA256 fingerprint of an OpenSSH public key
    Fingerprint {
        /// Public key file, e.g. ~/.ssh/id_ed25519.pub
        key: PathBuf,
    },
}
