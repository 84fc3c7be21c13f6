use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dbtunnel - SSH tunnels to remote databases
#[derive(Parser, Debug)]
#[command(name = "dbtunnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding databases.toml and settings.toml
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured databases
    List {
        /// Print records as JSON (passwords redacted)
        #[arg(long)]
        json: bool,
    },

    /// Validate a database record and show the resolved gateway connection
    Check {
        /// Database alias
        alias: String,

        /// Fill missing values from ~/.ssh/config
        #[arg(long)]
        ssh_config: bool,
    },

    /// Open a tunnel and keep it up until Ctrl-C
    Up {
        /// Database alias
        alias: String,

        /// Fill missing values from ~/.ssh/config
        #[arg(long)]
        ssh_config: bool,

        /// Local port to listen on (defaults to the record's PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Local bind address (defaults to the settings file)
        #[arg(short, long)]
        bind: Option<String>,
    },
}
