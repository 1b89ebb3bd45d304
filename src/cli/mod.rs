pub mod commands;
pub mod config;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "tenantctl")]
#[command(about = "tenantctl - operator commands for the tenant data plane")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Provision and inspect tenants")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "Apply or revert tenant schema migrations")]
    Migrate {
        #[command(subcommand)]
        cmd: commands::migrate::MigrateCommands,
    },

    #[command(about = "Refresh token maintenance")]
    Tokens {
        #[command(subcommand)]
        cmd: commands::tokens::TokenCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let state = config::connect().await?;

    let result = match cli.command {
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, &state, output_format).await,
        Commands::Migrate { cmd } => commands::migrate::handle(cmd, &state, output_format).await,
        Commands::Tokens { cmd } => commands::tokens::handle(cmd, &state, output_format).await,
    };

    state.shutdown().await;
    result
}
