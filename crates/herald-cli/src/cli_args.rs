use std::path::PathBuf;

use clap::Parser;

use crate::CliUserStore;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "herald-bot",
    about = "Telegram bot that registers users and broadcasts admin announcements",
    version
)]
pub struct Cli {
    #[arg(
        long = "bot-token",
        env = "BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram Bot API token"
    )]
    pub bot_token: String,

    #[arg(
        long = "admin-id",
        env = "ADMIN_ID",
        allow_negative_numbers = true,
        help = "Telegram user id allowed to run /stats, /users and the broadcast commands"
    )]
    pub admin_id: i64,

    #[arg(
        long = "user-store",
        env = "HERALD_USER_STORE",
        value_enum,
        default_value_t = CliUserStore::Json,
        help = "User directory backend"
    )]
    pub user_store: CliUserStore,

    #[arg(
        long = "users-file",
        env = "HERALD_USERS_FILE",
        default_value = "users.json",
        help = "Path of the JSON user directory (used with --user-store json)"
    )]
    pub users_file: PathBuf,

    #[arg(
        long = "sqlite-path",
        env = "HERALD_SQLITE_PATH",
        default_value = "users.sqlite3",
        help = "Path of the SQLite user directory (used with --user-store sqlite)"
    )]
    pub sqlite_path: PathBuf,

    #[arg(
        long = "telegram-api-base",
        env = "HERALD_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL for the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "request-timeout-ms",
        env = "HERALD_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one Bot API request in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "poll-timeout-seconds",
        env = "HERALD_POLL_TIMEOUT_SECONDS",
        default_value_t = 30,
        help = "Long-poll timeout passed to getUpdates (0 disables long polling)"
    )]
    pub poll_timeout_seconds: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "HERALD_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Attempts for polling, replies and status edits; broadcast deliveries never retry"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "HERALD_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff between retries in milliseconds"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "poll-error-backoff-ms",
        env = "HERALD_POLL_ERROR_BACKOFF_MS",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Pause after a failed getUpdates cycle in milliseconds"
    )]
    pub poll_error_backoff_ms: u64,

    #[arg(
        long = "broadcast-send-interval-ms",
        env = "HERALD_BROADCAST_SEND_INTERVAL_MS",
        default_value_t = 100,
        help = "Pause between broadcast deliveries in milliseconds"
    )]
    pub broadcast_send_interval_ms: u64,

    #[arg(
        long = "broadcast-report-every",
        env = "HERALD_BROADCAST_REPORT_EVERY",
        default_value_t = 10,
        value_parser = parse_positive_usize,
        help = "Edit the broadcast status message after this many recipients"
    )]
    pub broadcast_report_every: usize,

    #[arg(
        long = "broadcast-delivery-timeout-ms",
        env = "HERALD_BROADCAST_DELIVERY_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Optional cap on one broadcast delivery; slower attempts count as transient failures"
    )]
    pub broadcast_delivery_timeout_ms: Option<u64>,
}
