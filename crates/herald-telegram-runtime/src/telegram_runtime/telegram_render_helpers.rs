//! Reply texts for bot commands.

use herald_broadcast::{BroadcastError, CancelReceipt, CampaignState, ProgressSnapshot, Recipient};
use herald_core::truncate_chars;

use super::TELEGRAM_MAX_MESSAGE_CHARS;

pub(super) const START_GREETING: &str = "Heyy You Come On, Subscribe TraxDinosaur";
pub(super) const UNAUTHORIZED_REPLY: &str = "❌ You are not authorized to use this command.";

pub(super) fn truncate_for_telegram(text: &str) -> String {
    truncate_chars(text, TELEGRAM_MAX_MESSAGE_CHARS)
}

pub(super) fn render_id_reply(user_id: i64) -> String {
    format!("Your Telegram ID: {user_id}")
}

pub(super) fn render_stats_reply(total_users: usize) -> String {
    format!("Total Users: {total_users}")
}

pub(super) fn render_users_reply(users: &[Recipient]) -> String {
    if users.is_empty() {
        return "No users found.".to_string();
    }
    let mut text = String::from("Users List:");
    for user in users {
        let handle = user
            .handle
            .as_deref()
            .map(|handle| format!("@{handle}"))
            .unwrap_or_else(|| "N/A".to_string());
        text.push_str(&format!(
            "\n- {} ({handle}) | ID: {}",
            user.display_name, user.id
        ));
    }
    truncate_for_telegram(&text)
}

pub(super) fn broadcast_usage() -> String {
    [
        "📢 Broadcast Usage:",
        "/broadcast your message here",
        "",
        "The text after the command is sent as-is to every registered user.",
        "Use /bstatus to follow progress and /bcancel to stop.",
    ]
    .join("\n")
}

pub(super) fn render_broadcast_error(error: &BroadcastError) -> String {
    match error {
        BroadcastError::Unauthorized => UNAUTHORIZED_REPLY.to_string(),
        BroadcastError::EmptyMessage => broadcast_usage(),
        BroadcastError::AlreadyRunning => {
            "⚠️ A broadcast is already in progress. Please wait for it to complete.".to_string()
        }
        BroadcastError::NotRunning => "ℹ️ No broadcast is currently running.".to_string(),
        BroadcastError::NoRecipients => "❌ No users found to broadcast.".to_string(),
        BroadcastError::DirectoryUnavailable(_) => {
            "❌ Could not read the user list. Please try again later.".to_string()
        }
    }
}

pub(super) fn render_cancel_reply(receipt: &CancelReceipt) -> String {
    if receipt.already_requested {
        return "🛑 Broadcast cancellation is already in progress.".to_string();
    }
    format!(
        "🛑 Broadcast cancellation requested at {}/{}. The final report will follow.",
        receipt.snapshot.cursor, receipt.snapshot.total
    )
}

pub(super) fn render_status_reply(snapshot: &ProgressSnapshot) -> String {
    let state = match snapshot.state {
        CampaignState::Running => "Running...",
        CampaignState::Cancelling => "Cancelling...",
        CampaignState::Completed => "Completed",
        CampaignState::Idle => "Idle",
    };
    let mut text = format!(
        "📤 Broadcast Status\n\n📊 Progress: {}/{} ({:.1}%)\n✅ Successful: {}\n❌ Failed: {}\n⏱️ Elapsed Time: {:.1}s\n🚀 Status: {state}",
        snapshot.cursor,
        snapshot.total,
        snapshot.percent_complete(),
        snapshot.success_count,
        snapshot.failure_count,
        snapshot.elapsed.as_secs_f64(),
    );
    if snapshot.state == CampaignState::Running {
        text.push_str("\n\nUse /bcancel to stop the broadcast.");
    }
    text
}
