//! Plain-text rendering of campaign acknowledgement, progress and final report.

use std::fmt::Write as _;
use std::time::Duration;

use herald_core::truncate_chars;

use crate::campaign::{CampaignReport, ProgressSnapshot};

/// Failed recipients listed by name before the report collapses the rest.
pub const FAILED_LISTING_LIMIT: usize = 10;

const START_PREVIEW_CHARS: usize = 200;
const PROGRESS_PREVIEW_CHARS: usize = 100;

pub fn render_start_message(total: usize, message_body: &str) -> String {
    format!(
        "🚀 Starting Broadcast\n📊 Total Users: {total}\n⏳ Preparing to send...\n\n📨 Message Preview:\n{}",
        truncate_chars(message_body, START_PREVIEW_CHARS)
    )
}

pub fn render_progress_message(snapshot: &ProgressSnapshot, message_body: &str) -> String {
    format!(
        "📤 Broadcast in Progress\n📊 Progress: {}/{} ({:.1}%)\n✅ Successful: {}\n❌ Failed: {}\n⏱️ Elapsed: {}\n📨 Message: {}",
        snapshot.cursor,
        snapshot.total,
        snapshot.percent_complete(),
        snapshot.success_count,
        snapshot.failure_count,
        format_seconds(snapshot.elapsed),
        truncate_chars(message_body, PROGRESS_PREVIEW_CHARS)
    )
}

/// Renders the report that replaces the status message once a campaign ends.
///
/// The listing shows at most [`FAILED_LISTING_LIMIT`] recipients; the header
/// always carries the full failure count.
pub fn render_final_report(report: &CampaignReport) -> String {
    let snapshot = &report.snapshot;
    let title = if report.cancelled {
        "🛑 Broadcast Cancelled"
    } else {
        "🎉 Broadcast Completed!"
    };

    let mut text = format!(
        "{title}\n\n📊 Statistics:\n• ✅ Successful: {}\n• ❌ Failed: {}\n• ⏭️ Skipped: {}\n• 📨 Total: {}\n• ⏱️ Time Taken: {}\n• 📈 Success Rate: {:.1}%\n",
        snapshot.success_count,
        snapshot.failure_count,
        snapshot.skipped(),
        snapshot.total,
        format_seconds(snapshot.elapsed),
        snapshot.success_rate()
    );

    if !report.failures.is_empty() {
        let _ = write!(text, "\n📋 Failed Users ({}):\n", snapshot.failure_count);
        for (index, failure) in report
            .failures
            .iter()
            .take(FAILED_LISTING_LIMIT)
            .enumerate()
        {
            let handle = failure
                .recipient
                .handle
                .as_deref()
                .map(|handle| format!("@{handle}"))
                .unwrap_or_else(|| "N/A".to_string());
            let _ = writeln!(
                text,
                "{}. {} ({handle}) [{}]",
                index + 1,
                failure.recipient.display_name,
                failure.reason.as_str()
            );
        }
        let hidden = snapshot.failure_count.saturating_sub(FAILED_LISTING_LIMIT);
        if hidden > 0 {
            let _ = writeln!(text, "... and {hidden} more users");
        }
    }

    text.trim_end().to_string()
}

fn format_seconds(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}
