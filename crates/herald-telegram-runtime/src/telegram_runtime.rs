//! Telegram bot runtime that polls updates and dispatches bot commands.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use herald_broadcast::{
    BroadcastError, BroadcastSupervisor, PacingPolicy, StatusMessage, SupervisorConfig,
};
use herald_directory::UserDirectory;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

mod telegram_api_client;
mod telegram_command_helpers;
mod telegram_render_helpers;

pub use telegram_api_client::{TelegramApiClient, TelegramApiError};
use telegram_command_helpers::parse_telegram_command;
use telegram_render_helpers::{
    broadcast_usage, render_broadcast_error, render_cancel_reply, render_id_reply,
    render_stats_reply, render_status_reply, render_users_reply, truncate_for_telegram,
    START_GREETING, UNAUTHORIZED_REPLY,
};

/// Longest text the Bot API accepts in one message.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone)]
/// Runtime configuration for the Telegram polling loop.
pub struct TelegramBotRuntimeConfig {
    pub api_base: String,
    pub bot_token: String,
    pub admin_id: i64,
    pub request_timeout_ms: u64,
    pub poll_timeout: Duration,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub error_backoff: Duration,
    pub pacing: PacingPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    /// First and last name joined, falling back to the username or id.
    pub fn full_name(&self) -> String {
        let full_name = match self.last_name.as_deref().map(str::trim) {
            Some(last_name) if !last_name.is_empty() => {
                format!("{} {last_name}", self.first_name.trim())
            }
            _ => self.first_name.trim().to_string(),
        };
        let full_name = full_name.trim();
        if !full_name.is_empty() {
            return full_name.to_string();
        }
        self.username
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TelegramCommand {
    Start,
    Id,
    Stats,
    Users,
    Broadcast { text: String },
    BroadcastCancel,
    BroadcastStatus,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PollCycleReport {
    pub discovered_updates: usize,
    pub handled_commands: usize,
    pub ignored_updates: usize,
    pub failed_replies: usize,
}

/// Runs the bot until Ctrl-C, then cancels and drains any active broadcast.
pub async fn run_telegram_bot(
    config: TelegramBotRuntimeConfig,
    directory: Arc<dyn UserDirectory>,
) -> Result<()> {
    let mut runtime = TelegramBotRuntime::new(config, directory).await?;
    runtime
        .run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for ctrl-c: {error}");
                std::future::pending::<()>().await;
            }
        })
        .await
}

pub struct TelegramBotRuntime {
    config: TelegramBotRuntimeConfig,
    client: Arc<TelegramApiClient>,
    directory: Arc<dyn UserDirectory>,
    supervisor: BroadcastSupervisor,
    bot_username: Option<String>,
    next_offset: Option<i64>,
}

impl TelegramBotRuntime {
    pub async fn new(
        config: TelegramBotRuntimeConfig,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let client = Arc::new(TelegramApiClient::new(
            &config.api_base,
            &config.bot_token,
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?);
        let me = client
            .get_me()
            .await
            .context("failed to resolve bot identity with getMe")?;
        tracing::info!(
            bot_id = me.id,
            bot_username = me.username.as_deref().unwrap_or_default(),
            "telegram bot identity resolved"
        );

        let supervisor = BroadcastSupervisor::new(
            SupervisorConfig {
                admin_id: config.admin_id,
                pacing: config.pacing,
            },
            Arc::clone(&directory),
            client.clone(),
        );

        Ok(Self {
            config,
            client,
            directory,
            supervisor,
            bot_username: me.username,
            next_offset: None,
        })
    }

    pub fn supervisor(&self) -> &BroadcastSupervisor {
        &self.supervisor
    }

    /// Polls until `shutdown` resolves, then drains the active broadcast.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            directory = self.directory.backend_label(),
            "telegram bot polling started"
        );
        loop {
            let cycle = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                cycle = self.poll_once() => cycle,
            };
            match cycle {
                Ok(report) if report.discovered_updates > 0 => tracing::debug!(
                    discovered = report.discovered_updates,
                    handled = report.handled_commands,
                    ignored = report.ignored_updates,
                    failed_replies = report.failed_replies,
                    "telegram poll cycle"
                ),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("telegram poll failed: {error:#}");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("telegram bot shutdown requested");
        self.supervisor.shutdown().await;
        Ok(())
    }

    /// Fetches one batch of updates and handles them in order.
    pub(crate) async fn poll_once(&mut self) -> Result<PollCycleReport> {
        let updates = self
            .client
            .get_updates(self.next_offset, self.config.poll_timeout)
            .await
            .context("telegram getUpdates failed")?;
        let mut report = PollCycleReport::default();
        for update in updates {
            report.discovered_updates = report.discovered_updates.saturating_add(1);
            let next = update.update_id.saturating_add(1);
            self.next_offset = Some(self.next_offset.map_or(next, |offset| offset.max(next)));
            self.handle_update(update, &mut report).await;
        }
        Ok(report)
    }

    async fn handle_update(&self, update: TelegramUpdate, report: &mut PollCycleReport) {
        let Some(message) = update.message else {
            report.ignored_updates = report.ignored_updates.saturating_add(1);
            return;
        };
        let (Some(sender), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
            report.ignored_updates = report.ignored_updates.saturating_add(1);
            return;
        };
        let Some(command) = parse_telegram_command(text, self.bot_username.as_deref()) else {
            report.ignored_updates = report.ignored_updates.saturating_add(1);
            return;
        };

        report.handled_commands = report.handled_commands.saturating_add(1);
        tracing::debug!(
            update_id = update.update_id,
            actor = sender.id,
            command = command.as_str(),
            "telegram command received"
        );
        let reply = self.dispatch(command, sender, message.chat.id).await;
        if let Some(reply) = reply {
            if let Err(error) = self.reply(message.chat.id, &reply).await {
                report.failed_replies = report.failed_replies.saturating_add(1);
                tracing::warn!(chat_id = message.chat.id, "failed to send reply: {error}");
            }
        }
    }

    /// Runs one command; `None` means the command replies on its own.
    async fn dispatch(
        &self,
        command: TelegramCommand,
        sender: &TelegramUser,
        chat_id: i64,
    ) -> Option<String> {
        if command.requires_admin() && !self.supervisor.is_admin(sender.id) {
            tracing::info!(
                actor = sender.id,
                command = command.as_str(),
                "refused admin command"
            );
            return Some(UNAUTHORIZED_REPLY.to_string());
        }

        match command {
            TelegramCommand::Start => {
                match self
                    .directory
                    .upsert_if_absent(sender.id, sender.username.as_deref(), &sender.full_name())
                    .await
                {
                    Ok(true) => tracing::info!(user_id = sender.id, "registered new user"),
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(user_id = sender.id, "failed to register user: {error}")
                    }
                }
                Some(START_GREETING.to_string())
            }
            TelegramCommand::Id => Some(render_id_reply(sender.id)),
            TelegramCommand::Stats => Some(match self.directory.count().await {
                Ok(count) => render_stats_reply(count),
                Err(error) => {
                    tracing::warn!("failed to count users: {error}");
                    render_broadcast_error(&BroadcastError::DirectoryUnavailable(error.to_string()))
                }
            }),
            TelegramCommand::Users => Some(match self.directory.list_all().await {
                Ok(users) => render_users_reply(&users),
                Err(error) => {
                    tracing::warn!("failed to list users: {error}");
                    render_broadcast_error(&BroadcastError::DirectoryUnavailable(error.to_string()))
                }
            }),
            TelegramCommand::Broadcast { text } => {
                if text.trim().is_empty() {
                    return Some(broadcast_usage());
                }
                let status = Arc::new(TelegramStatusMessage::new(self.client.clone(), chat_id));
                match self.supervisor.start(sender.id, &text, status).await {
                    Ok(_) => None,
                    Err(error) => Some(rejected("broadcast", sender.id, &error)),
                }
            }
            TelegramCommand::BroadcastCancel => Some(match self.supervisor.cancel(sender.id) {
                Ok(receipt) => render_cancel_reply(&receipt),
                Err(error) => rejected("bcancel", sender.id, &error),
            }),
            TelegramCommand::BroadcastStatus => Some(match self.supervisor.status(sender.id) {
                Ok(snapshot) => render_status_reply(&snapshot),
                Err(error) => rejected("bstatus", sender.id, &error),
            }),
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), TelegramApiError> {
        self.client
            .send_message(chat_id, &truncate_for_telegram(text))
            .await
            .map(|_| ())
    }
}

fn rejected(command: &'static str, actor: i64, error: &BroadcastError) -> String {
    tracing::info!(
        actor,
        command,
        reason = error.reason_code(),
        "broadcast command rejected"
    );
    render_broadcast_error(error)
}

/// Status message posted on the first update and edited in place afterwards.
struct TelegramStatusMessage {
    client: Arc<TelegramApiClient>,
    chat_id: i64,
    message_id: AsyncMutex<Option<i64>>,
}

impl TelegramStatusMessage {
    fn new(client: Arc<TelegramApiClient>, chat_id: i64) -> Self {
        Self {
            client,
            chat_id,
            message_id: AsyncMutex::new(None),
        }
    }

    async fn post_or_edit(&self, text: &str, retry: bool) -> Result<()> {
        let text = truncate_for_telegram(text);
        let mut message_id = self.message_id.lock().await;
        match *message_id {
            Some(existing) => {
                let edited = if retry {
                    self.client
                        .edit_message_text(self.chat_id, existing, &text)
                        .await
                } else {
                    self.client
                        .edit_message_text_once(self.chat_id, existing, &text)
                        .await
                };
                edited.context("failed to edit broadcast status message")?
            }
            None => {
                let posted = if retry {
                    self.client.send_message(self.chat_id, &text).await
                } else {
                    self.client.send_message_once(self.chat_id, &text).await
                };
                let posted = posted.context("failed to post broadcast status message")?;
                *message_id = Some(posted.message_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatusMessage for TelegramStatusMessage {
    async fn update(&self, text: &str) -> Result<()> {
        self.post_or_edit(text, true).await
    }

    async fn update_progress(&self, text: &str) -> Result<()> {
        self.post_or_edit(text, false).await
    }
}
