use std::time::Duration;

use anyhow::{bail, Result};
use herald_broadcast::PacingPolicy;
use herald_directory::DirectoryBackend;
use herald_telegram_runtime::TelegramBotRuntimeConfig;

use crate::{Cli, CliUserStore};

pub fn directory_backend_from_cli(cli: &Cli) -> DirectoryBackend {
    match cli.user_store {
        CliUserStore::Json => DirectoryBackend::JsonFile(cli.users_file.clone()),
        CliUserStore::Sqlite => DirectoryBackend::Sqlite(cli.sqlite_path.clone()),
        CliUserStore::Memory => DirectoryBackend::Memory,
    }
}

/// Builds the runtime configuration, rejecting blank credentials and API bases.
pub fn runtime_config_from_cli(cli: &Cli) -> Result<TelegramBotRuntimeConfig> {
    let bot_token = cli.bot_token.trim();
    if bot_token.is_empty() {
        bail!("--bot-token (or BOT_TOKEN) must not be empty");
    }
    let api_base = cli.telegram_api_base.trim().trim_end_matches('/');
    if api_base.is_empty() {
        bail!("--telegram-api-base must not be empty");
    }

    Ok(TelegramBotRuntimeConfig {
        api_base: api_base.to_string(),
        bot_token: bot_token.to_string(),
        admin_id: cli.admin_id,
        request_timeout_ms: cli.request_timeout_ms,
        poll_timeout: Duration::from_secs(cli.poll_timeout_seconds),
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        error_backoff: Duration::from_millis(cli.poll_error_backoff_ms),
        pacing: PacingPolicy {
            send_interval: Duration::from_millis(cli.broadcast_send_interval_ms),
            report_every: cli.broadcast_report_every,
            delivery_timeout: cli.broadcast_delivery_timeout_ms.map(Duration::from_millis),
        },
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;
    use herald_directory::DirectoryBackend;

    use super::{directory_backend_from_cli, runtime_config_from_cli};
    use crate::Cli;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["herald-bot", "--bot-token", "t0k3n", "--admin-id", "7"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parse cli")
    }

    #[test]
    fn functional_runtime_config_carries_pacing_flags() {
        let cli = parse(&[
            "--broadcast-send-interval-ms",
            "250",
            "--broadcast-report-every",
            "5",
            "--broadcast-delivery-timeout-ms",
            "1500",
            "--telegram-api-base",
            "http://127.0.0.1:8081/",
        ]);
        let config = runtime_config_from_cli(&cli).expect("config");
        assert_eq!(config.api_base, "http://127.0.0.1:8081");
        assert_eq!(config.admin_id, 7);
        assert_eq!(config.pacing.send_interval, Duration::from_millis(250));
        assert_eq!(config.pacing.report_every, 5);
        assert_eq!(
            config.pacing.delivery_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
    }

    #[test]
    fn regression_blank_bot_token_is_rejected() {
        let cli = Cli::try_parse_from(["herald-bot", "--bot-token", "   ", "--admin-id", "7"])
            .expect("parse cli");
        let error = runtime_config_from_cli(&cli).expect_err("blank token");
        assert!(error.to_string().contains("--bot-token"));
    }

    #[test]
    fn unit_directory_backend_follows_user_store_flag() {
        assert_eq!(
            directory_backend_from_cli(&parse(&[])),
            DirectoryBackend::JsonFile(PathBuf::from("users.json"))
        );
        assert_eq!(
            directory_backend_from_cli(&parse(&["--user-store", "memory"])),
            DirectoryBackend::Memory
        );
        assert_eq!(
            directory_backend_from_cli(&parse(&["--user-store", "sqlite"])),
            DirectoryBackend::Sqlite(PathBuf::from("users.sqlite3"))
        );
    }
}
