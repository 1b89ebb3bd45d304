use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Delete expired refresh tokens")]
    Sweep,

    #[command(about = "Revoke every refresh token held by a user")]
    Revoke {
        #[arg(help = "User ID")]
        user_id: i64,
    },
}

pub async fn handle(cmd: TokenCommands, state: &AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Sweep => {
            let deleted = state.tokens.sweep_expired().await?;
            output_success(
                &output_format,
                &format!("Deleted {} expired tokens", deleted),
                Some(json!({ "deleted": deleted })),
            )
        }
        TokenCommands::Revoke { user_id } => {
            let revoked = state.tokens.revoke_all(user_id).await?;
            output_success(
                &output_format,
                &format!("Revoked {} tokens for user {}", revoked, user_id),
                Some(json!({ "user_id": user_id, "revoked": revoked })),
            )
        }
    }
}
