mod bootstrap_helpers;

use anyhow::{Context, Result};
use clap::Parser;
use herald_cli::{directory_backend_from_cli, runtime_config_from_cli, Cli};
use herald_directory::open_user_directory;
use herald_telegram_runtime::run_telegram_bot;

use crate::bootstrap_helpers::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal; flags and the process environment still apply.
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = runtime_config_from_cli(&cli)?;
    let backend = directory_backend_from_cli(&cli);
    let directory = open_user_directory(&backend)
        .with_context(|| format!("failed to open {} user directory", backend.as_str()))?;
    tracing::info!(
        admin_id = config.admin_id,
        directory = directory.backend_label(),
        send_interval_ms = config.pacing.send_interval.as_millis() as u64,
        report_every = config.pacing.report_every,
        "starting herald bot"
    );

    run_telegram_bot(config, directory).await
}
