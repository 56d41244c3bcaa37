use std::time::Duration;

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_REPORT_EVERY: usize = 10;

/// Send pacing and progress cadence injected into a broadcast job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Pause after each attempt, except the last.
    pub send_interval: Duration,
    /// Progress is rendered every `report_every` recipients and on the last one.
    pub report_every: usize,
    /// Upper bound for one attempt; an attempt exceeding it counts as transient.
    pub delivery_timeout: Option<Duration>,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            send_interval: DEFAULT_SEND_INTERVAL,
            report_every: DEFAULT_REPORT_EVERY,
            delivery_timeout: None,
        }
    }
}

impl PacingPolicy {
    pub fn should_report(&self, cursor: usize, total: usize) -> bool {
        cursor == total || cursor % self.report_every.max(1) == 0
    }
}
