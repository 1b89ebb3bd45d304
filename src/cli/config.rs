use anyhow::Context;
use tracing::debug;

use crate::config::AppConfig;
use crate::state::AppState;

/// Reads the same environment as the server and opens the master database.
/// Master migrations are applied on the way in, so a fresh database is
/// usable by the first command.
pub async fn connect() -> anyhow::Result<AppState> {
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env();
    debug!(
        "Connecting to {} on {}:{}",
        config.database.database, config.database.host, config.database.port
    );

    AppState::bootstrap(config)
        .await
        .context("Failed to open the master database")
}
