//! The recipient loop that drives one campaign to completion.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use herald_directory::Recipient;
use tokio::sync::watch;

use crate::campaign::{Campaign, CampaignReport, CampaignState, ProgressSnapshot};
use crate::delivery::{DeliveryChannel, DeliveryOutcome};
use crate::pacing::PacingPolicy;

/// Receives progress snapshots at the configured cadence.
///
/// Errors are logged by the job and never stop the campaign.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()>;
}

/// Sequential, paced, cancellable delivery of one campaign.
pub struct BroadcastJob {
    campaign: Campaign,
    channel: Arc<dyn DeliveryChannel>,
    pacing: PacingPolicy,
    cancel_rx: watch::Receiver<bool>,
    progress_tx: watch::Sender<ProgressSnapshot>,
}

impl BroadcastJob {
    /// Wraps a freshly started campaign. The returned receiver always holds
    /// the latest snapshot, updated after every attempt.
    pub fn new(
        campaign: Campaign,
        channel: Arc<dyn DeliveryChannel>,
        pacing: PacingPolicy,
        cancel_rx: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (progress_tx, progress_rx) = watch::channel(campaign.snapshot());
        (
            Self {
                campaign,
                channel,
                pacing,
                cancel_rx,
                progress_tx,
            },
            progress_rx,
        )
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    /// Attempts every recipient once, in order, until done or cancelled.
    pub async fn run(mut self, sink: &dyn ProgressSink) -> CampaignReport {
        let total = self.campaign.total();
        tracing::info!(
            campaign_id = self.campaign.id(),
            total,
            "broadcast job started"
        );

        loop {
            // single cancellation checkpoint per iteration
            if *self.cancel_rx.borrow() {
                self.campaign.request_cancel();
            }
            if self.campaign.state() != CampaignState::Running {
                tracing::info!(
                    campaign_id = self.campaign.id(),
                    cursor = self.campaign.cursor(),
                    total,
                    "broadcast cancelled"
                );
                break;
            }
            let Some(recipient) = self.campaign.next_recipient().cloned() else {
                break;
            };

            let outcome = self.attempt(&recipient).await;
            if let Some(reason) = outcome.failure_reason() {
                tracing::debug!(
                    campaign_id = self.campaign.id(),
                    recipient_id = recipient.id,
                    reason = reason.as_str(),
                    detail = outcome.detail().unwrap_or_default(),
                    "broadcast delivery failed"
                );
            }
            self.campaign.record_outcome(&outcome);

            let snapshot = self.campaign.snapshot();
            self.progress_tx.send_replace(snapshot);
            if self.pacing.should_report(snapshot.cursor, total) {
                self.publish(sink, &snapshot).await;
            }

            if snapshot.cursor < total {
                self.pace().await;
            }
        }

        let report = self.campaign.complete();
        self.progress_tx.send_replace(report.snapshot);
        tracing::info!(
            campaign_id = report.campaign_id.as_str(),
            cursor = report.snapshot.cursor,
            total = report.snapshot.total,
            success = report.snapshot.success_count,
            failed = report.snapshot.failure_count,
            cancelled = report.cancelled,
            "broadcast job finished"
        );
        report
    }

    async fn attempt(&self, recipient: &Recipient) -> DeliveryOutcome {
        let send = self
            .channel
            .send(recipient.id, self.campaign.message_body());
        match self.pacing.delivery_timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(outcome) => outcome,
                Err(_) => DeliveryOutcome::transient(format!(
                    "delivery timed out after {} ms",
                    limit.as_millis()
                )),
            },
            None => send.await,
        }
    }

    /// Renders progress unless cancellation arrives first; a slow render is
    /// abandoned rather than holding back the cancellation checkpoint.
    async fn publish(&self, sink: &dyn ProgressSink, snapshot: &ProgressSnapshot) {
        tokio::select! {
            biased;
            result = sink.publish(snapshot) => {
                if let Err(error) = result {
                    tracing::warn!(
                        campaign_id = self.campaign.id(),
                        cursor = snapshot.cursor,
                        "failed to render broadcast progress: {error:#}"
                    );
                }
            }
            true = self.cancellation() => tracing::debug!(
                campaign_id = self.campaign.id(),
                cursor = snapshot.cursor,
                "progress render abandoned after cancellation"
            ),
        }
    }

    /// Sleeps for the send interval, waking early once cancellation is requested.
    async fn pace(&self) {
        let interval = self.pacing.send_interval;
        if interval.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            true = self.cancellation() => {}
        }
    }

    /// Resolves to `true` once cancellation is requested; a dropped sender
    /// yields `false`, which disables the `select!` branch matching on `true`.
    fn cancellation(&self) -> impl Future<Output = bool> + Send + 'static {
        let mut cancel_rx = self.cancel_rx.clone();
        async move { cancel_rx.wait_for(|requested| *requested).await.is_ok() }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use herald_directory::Recipient;
    use tokio::sync::{watch, Mutex as AsyncMutex};

    use super::{BroadcastJob, ProgressSink};
    use crate::campaign::{Campaign, CampaignState, ProgressSnapshot};
    use crate::delivery::{DeliveryChannel, DeliveryOutcome, FailureReason};
    use crate::pacing::PacingPolicy;

    struct ScriptedChannel {
        outcomes: AsyncMutex<VecDeque<DeliveryOutcome>>,
        attempts: AsyncMutex<Vec<i64>>,
        latency: Duration,
    }

    impl ScriptedChannel {
        fn new(outcomes: Vec<DeliveryOutcome>) -> Self {
            Self {
                outcomes: AsyncMutex::new(VecDeque::from(outcomes)),
                attempts: AsyncMutex::new(Vec::new()),
                latency: Duration::ZERO,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        async fn attempts(&self) -> Vec<i64> {
            self.attempts.lock().await.clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        async fn send(&self, recipient_id: i64, _body: &str) -> DeliveryOutcome {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.attempts.lock().await.push(recipient_id);
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or(DeliveryOutcome::Delivered)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        snapshots: AsyncMutex<Vec<ProgressSnapshot>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn publish(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
            self.snapshots.lock().await.push(*snapshot);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn publish(&self, _snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
            anyhow::bail!("message to edit not found")
        }
    }

    /// Never finishes rendering, like a status edit stuck behind flood control.
    struct StalledSink;

    #[async_trait]
    impl ProgressSink for StalledSink {
        async fn publish(&self, _snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn recipients(names: &[&str]) -> Vec<Recipient> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| Recipient::new(index as i64 + 1, *name, Some(*name)))
            .collect()
    }

    fn numbered(count: usize) -> Vec<Recipient> {
        (1..=count)
            .map(|id| Recipient::new(id as i64, format!("user-{id}"), None))
            .collect()
    }

    fn job_with(
        recipients: Vec<Recipient>,
        channel: Arc<dyn DeliveryChannel>,
        pacing: PacingPolicy,
    ) -> (
        BroadcastJob,
        watch::Sender<bool>,
        watch::Receiver<ProgressSnapshot>,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let campaign = Campaign::start("campaign-test", recipients, "hello everyone");
        let (job, progress_rx) = BroadcastJob::new(campaign, channel, pacing, cancel_rx);
        (job, cancel_tx, progress_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn functional_run_records_mixed_outcomes_in_attempt_order() {
        let channel = Arc::new(ScriptedChannel::new(vec![
            DeliveryOutcome::Delivered,
            DeliveryOutcome::unreachable("Forbidden: bot was blocked by the user"),
            DeliveryOutcome::Delivered,
        ]));
        let (job, _cancel_tx, _progress_rx) = job_with(
            recipients(&["A", "B", "C"]),
            channel.clone(),
            PacingPolicy::default(),
        );

        let report = job.run(&RecordingSink::default()).await;

        assert_eq!(report.snapshot.cursor, 3);
        assert_eq!(report.snapshot.success_count, 2);
        assert_eq!(report.snapshot.failure_count, 1);
        assert_eq!(report.snapshot.state, CampaignState::Completed);
        assert!(!report.cancelled);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].recipient.display_name, "B");
        assert_eq!(report.failures[0].reason, FailureReason::Unreachable);
        assert_eq!(channel.attempts().await, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_run_reports_on_cadence_and_final_recipient() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let (job, _cancel_tx, _progress_rx) =
            job_with(numbered(25), channel, PacingPolicy::default());
        let sink = RecordingSink::default();

        let report = job.run(&sink).await;

        let cursors = sink
            .snapshots
            .lock()
            .await
            .iter()
            .map(|snapshot| snapshot.cursor)
            .collect::<Vec<_>>();
        assert_eq!(cursors, vec![10, 20, 25]);
        assert_eq!(report.snapshot.success_count, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn regression_render_failures_never_abort_the_campaign() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let (job, _cancel_tx, _progress_rx) =
            job_with(numbered(12), channel.clone(), PacingPolicy::default());

        let report = job.run(&FailingSink).await;

        assert_eq!(report.snapshot.cursor, 12);
        assert_eq!(channel.attempts().await.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_pacing_waits_between_sends_but_not_after_last() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let pacing = PacingPolicy {
            send_interval: Duration::from_millis(100),
            ..PacingPolicy::default()
        };
        let (job, _cancel_tx, _progress_rx) = job_with(numbered(3), channel, pacing);

        let report = job.run(&RecordingSink::default()).await;

        assert!(report.snapshot.elapsed >= Duration::from_millis(200));
        assert!(report.snapshot.elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn integration_cancel_during_pacing_stops_before_next_recipient() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let pacing = PacingPolicy {
            send_interval: Duration::from_secs(1),
            ..PacingPolicy::default()
        };
        let (job, cancel_tx, progress_rx) = job_with(numbered(20), channel.clone(), pacing);
        let handle = tokio::spawn(async move { job.run(&RecordingSink::default()).await });

        while progress_rx.borrow().cursor < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel_tx.send_replace(true);
        let report = handle.await.expect("job task");

        assert!(report.cancelled);
        assert_eq!(report.snapshot.cursor, 5);
        assert_eq!(report.snapshot.skipped(), 15);
        assert_eq!(
            report.snapshot.success_count + report.snapshot.failure_count,
            5
        );
        assert_eq!(channel.attempts().await, vec![1, 2, 3, 4, 5]);
        assert!(report.snapshot.elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn integration_cancel_during_inflight_attempt_lets_it_finish() {
        let channel =
            Arc::new(ScriptedChannel::new(Vec::new()).with_latency(Duration::from_secs(5)));
        let (job, cancel_tx, progress_rx) =
            job_with(numbered(3), channel.clone(), PacingPolicy::default());
        let handle = tokio::spawn(async move { job.run(&RecordingSink::default()).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(progress_rx.borrow().cursor, 0);
        cancel_tx.send_replace(true);
        let report = handle.await.expect("job task");

        assert!(report.cancelled);
        assert_eq!(report.snapshot.cursor, 1);
        assert_eq!(report.snapshot.success_count, 1);
        assert_eq!(report.snapshot.skipped(), 2);
        assert_eq!(channel.attempts().await, vec![1]);
        assert!(report.snapshot.elapsed >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_stalled_progress_render_yields_to_cancellation() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let pacing = PacingPolicy {
            report_every: 1,
            ..PacingPolicy::default()
        };
        let (job, cancel_tx, progress_rx) = job_with(numbered(5), channel.clone(), pacing);
        let handle = tokio::spawn(async move { job.run(&StalledSink).await });

        while progress_rx.borrow().cursor < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel_tx.send_replace(true);
        let report = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("job finishes despite the stalled render")
            .expect("job task");

        assert!(report.cancelled);
        assert_eq!(report.snapshot.cursor, 1);
        assert_eq!(channel.attempts().await, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn regression_cancel_before_first_attempt_sends_nothing() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let (job, cancel_tx, _progress_rx) =
            job_with(numbered(4), channel.clone(), PacingPolicy::default());
        cancel_tx.send_replace(true);

        let report = job.run(&RecordingSink::default()).await;

        assert!(report.cancelled);
        assert_eq!(report.snapshot.cursor, 0);
        assert!(channel.attempts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_progress_channel_is_monotonic_per_attempt() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new()));
        let (job, _cancel_tx, mut progress_rx) =
            job_with(numbered(6), channel, PacingPolicy::default());
        let handle = tokio::spawn(async move { job.run(&RecordingSink::default()).await });

        let mut observed = Vec::new();
        while progress_rx.changed().await.is_ok() {
            observed.push(progress_rx.borrow_and_update().cursor);
        }
        handle.await.expect("job task");

        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(observed.last().copied(), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_slow_attempt_past_timeout_counts_as_transient() {
        let channel = Arc::new(
            ScriptedChannel::new(Vec::new()).with_latency(Duration::from_secs(30)),
        );
        let pacing = PacingPolicy {
            delivery_timeout: Some(Duration::from_secs(2)),
            ..PacingPolicy::default()
        };
        let (job, _cancel_tx, _progress_rx) = job_with(numbered(2), channel, pacing);

        let report = job.run(&RecordingSink::default()).await;

        assert_eq!(report.snapshot.failure_count, 2);
        assert!(report
            .failures
            .iter()
            .all(|failure| failure.reason == FailureReason::Transient));
        assert_eq!(report.failures.len(), report.snapshot.failure_count);
    }
}
