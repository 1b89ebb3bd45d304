use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum MigrateCommands {
    #[command(about = "Apply pending migrations to every tenant database")]
    All,

    #[command(about = "Apply pending migrations to one tenant database")]
    Tenant {
        #[arg(help = "Tenant name")]
        name: String,
    },

    #[command(about = "Revert tenant migrations on every tenant database")]
    Undo,
}

pub async fn handle(cmd: MigrateCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        MigrateCommands::All => {
            let report = state.tenants.migrate_all().await?;
            output_report(&output_format, "Migrated", &report)
        }
        MigrateCommands::Tenant { name } => {
            state.tenants.migrate_one(&name).await?;
            output_success(
                &output_format,
                &format!("Tenant '{}' is up to date", name),
                Some(json!({ "tenant": name })),
            )
        }
        MigrateCommands::Undo => {
            let report = state.tenants.undo_all().await?;
            output_report(&output_format, "Reverted", &report)
        }
    }
}
