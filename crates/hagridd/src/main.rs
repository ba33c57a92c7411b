//! hagridd — the hagrid daemon.
//!
//! Loads `hagrid.toml`, opens the redb state store, builds one hook
//! provider per configured resource type, registers the configured
//! resources, and runs the HA orchestrator loop until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! hagridd run --config /etc/hagrid/hagrid.toml
//! hagridd status --data-dir /var/lib/hagrid
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hagridd", about = "hagrid HA orchestrator daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator loop.
    Run {
        /// Path to hagrid.toml.
        #[arg(long, default_value = "/etc/hagrid/hagrid.toml")]
        config: PathBuf,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print persisted health records as JSON. The daemon must be stopped.
    Status {
        #[arg(long, default_value = daemon::DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,hagridd=debug,hagrid_health=debug,hagrid_state=debug")
    });
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run { config, data_dir } => daemon::run(config, data_dir).await,
        Command::Status { data_dir } => status(data_dir),
    }
}

fn status(data_dir: PathBuf) -> anyhow::Result<()> {
    let db_path = data_dir.join(daemon::DB_FILE);
    anyhow::ensure!(db_path.exists(), "no state store at {}", db_path.display());

    let state = hagrid_state::StateStore::open(&db_path)?;
    let records = state.list_records()?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
