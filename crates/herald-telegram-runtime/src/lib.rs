//! Telegram Bot API transport for Herald.
//!
//! Long-polls `getUpdates`, answers the registration and administration
//! commands, and plugs `sendMessage` into the broadcast core as its delivery
//! channel.

pub mod telegram_runtime;

pub use telegram_runtime::{
    run_telegram_bot, TelegramApiClient, TelegramApiError, TelegramBotRuntime,
    TelegramBotRuntimeConfig, TELEGRAM_MAX_MESSAGE_CHARS,
};
