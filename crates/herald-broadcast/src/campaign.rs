//! Campaign state owned by a running broadcast job.

use std::sync::Arc;
use std::time::Duration;

use herald_core::current_unix_timestamp_ms;
use herald_directory::Recipient;
use tokio::time::Instant;

use crate::delivery::{DeliveryOutcome, FailureReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Idle,
    Running,
    Cancelling,
    Completed,
}

impl CampaignState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
        }
    }

    /// Running or cancelling; the states that hold the single-flight slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFailure {
    pub recipient: Recipient,
    pub reason: FailureReason,
    pub detail: Option<String>,
}

/// Point-in-time view of a campaign's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub state: CampaignState,
    pub cursor: usize,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Recipients not attempted (yet, or ever if the campaign was cancelled).
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.cursor)
    }

    pub fn percent_complete(&self) -> f64 {
        percentage(self.cursor, self.total)
    }

    /// Successful deliveries as a share of all recipients.
    pub fn success_rate(&self) -> f64 {
        percentage(self.success_count, self.total)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

/// One broadcast run. Recipients and body are fixed at creation.
#[derive(Debug)]
pub struct Campaign {
    id: String,
    state: CampaignState,
    recipients: Arc<[Recipient]>,
    cursor: usize,
    success_count: usize,
    failure_count: usize,
    failures: Vec<RecipientFailure>,
    started_at: Instant,
    started_unix_ms: u64,
    message_body: Arc<str>,
}

impl Campaign {
    /// Creates a campaign already in `Running` with its clock started.
    pub fn start(
        id: impl Into<String>,
        recipients: Vec<Recipient>,
        message_body: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            id: id.into(),
            state: CampaignState::Running,
            recipients: recipients.into(),
            cursor: 0,
            success_count: 0,
            failure_count: 0,
            failures: Vec::new(),
            started_at: Instant::now(),
            started_unix_ms: current_unix_timestamp_ms(),
            message_body: message_body.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.recipients.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn message_body(&self) -> &str {
        &self.message_body
    }

    pub fn failures(&self) -> &[RecipientFailure] {
        &self.failures
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            state: self.state,
            cursor: self.cursor,
            total: self.total(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            elapsed: self.started_at.elapsed(),
        }
    }

    pub(crate) fn next_recipient(&self) -> Option<&Recipient> {
        self.recipients.get(self.cursor)
    }

    /// Records the outcome for the recipient at `cursor` and advances past it.
    pub(crate) fn record_outcome(&mut self, outcome: &DeliveryOutcome) {
        let Some(recipient) = self.recipients.get(self.cursor) else {
            return;
        };
        match outcome.failure_reason() {
            None => self.success_count += 1,
            Some(reason) => {
                self.failure_count += 1;
                self.failures.push(RecipientFailure {
                    recipient: recipient.clone(),
                    reason,
                    detail: outcome.detail().map(str::to_string),
                });
            }
        }
        self.cursor += 1;
    }

    pub(crate) fn request_cancel(&mut self) {
        if self.state == CampaignState::Running {
            self.state = CampaignState::Cancelling;
        }
    }

    /// Freezes the campaign into its final report.
    pub(crate) fn complete(mut self) -> CampaignReport {
        let cancelled = self.state == CampaignState::Cancelling;
        self.state = CampaignState::Completed;
        CampaignReport {
            snapshot: self.snapshot(),
            campaign_id: self.id,
            cancelled,
            failures: self.failures,
            started_unix_ms: self.started_unix_ms,
            message_body: self.message_body,
        }
    }
}

/// Frozen outcome of a finished campaign.
#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub cancelled: bool,
    pub snapshot: ProgressSnapshot,
    pub failures: Vec<RecipientFailure>,
    pub started_unix_ms: u64,
    pub message_body: Arc<str>,
}
