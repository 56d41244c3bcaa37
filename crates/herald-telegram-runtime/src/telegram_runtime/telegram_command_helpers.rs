//! Bot command parsing.

use super::TelegramCommand;

/// Parses a `/command[@bot] [args]` message.
///
/// Returns `None` for plain text, unknown commands and commands addressed to
/// a different bot.
pub(super) fn parse_telegram_command(
    text: &str,
    bot_username: Option<&str>,
) -> Option<TelegramCommand> {
    let trimmed = text.trim();
    let without_slash = trimmed.strip_prefix('/')?;
    let (head, args) = match without_slash.find(char::is_whitespace) {
        Some(index) => (&without_slash[..index], without_slash[index..].trim()),
        None => (without_slash, ""),
    };
    let (name, addressee) = match head.split_once('@') {
        Some((name, addressee)) => (name, Some(addressee)),
        None => (head, None),
    };
    if let (Some(addressee), Some(bot_username)) = (addressee, bot_username) {
        if !addressee.eq_ignore_ascii_case(bot_username.trim_start_matches('@')) {
            return None;
        }
    }

    let command = match name {
        "start" => TelegramCommand::Start,
        "id" => TelegramCommand::Id,
        "stats" => TelegramCommand::Stats,
        "users" => TelegramCommand::Users,
        "broadcast" => TelegramCommand::Broadcast {
            text: args.to_string(),
        },
        "bcancel" => TelegramCommand::BroadcastCancel,
        "bstatus" => TelegramCommand::BroadcastStatus,
        _ => return None,
    };
    Some(command)
}

impl TelegramCommand {
    pub(super) fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Id => "id",
            Self::Stats => "stats",
            Self::Users => "users",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastCancel => "bcancel",
            Self::BroadcastStatus => "bstatus",
        }
    }

    /// Commands reserved for the administrator.
    pub(super) fn requires_admin(&self) -> bool {
        !matches!(self, Self::Start | Self::Id)
    }
}
