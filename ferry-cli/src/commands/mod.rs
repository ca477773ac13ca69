//! Commands module
//!
//! Defines all CLI commands and routes them to their handlers.

mod run;

pub use run::LaunchArgs;

use anyhow::Result;
use clap::Subcommand;
use ferry_client::OrchestratorClient;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Launch a promotion run (or pick up the run with the same id)
    Run(LaunchArgs),
    /// Show a run in detail
    Get {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print the raw run record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all runs
    List,
    /// Cancel a run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Retry the failed stage of a run
    Retry {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Release the endpoint of a finished run
    Teardown {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Handle a CLI command
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        Commands::Run(args) => run::launch(&client, args).await,
        Commands::Get { id, json } => run::get(&client, &id, json).await,
        Commands::List => run::list(&client).await,
        Commands::Cancel { id } => run::cancel(&client, &id).await,
        Commands::Retry { id } => run::retry(&client, &id).await,
        Commands::Teardown { id } => run::teardown(&client, &id).await,
    }
}
