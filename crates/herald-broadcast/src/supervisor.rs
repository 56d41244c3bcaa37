//! Single-flight gate around broadcast campaigns.
//!
//! The supervisor owns one slot. `start` reserves it before reading the
//! directory, the spawned job task holds it until the final report has been
//! rendered, and a lease guard hands it back exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use herald_core::{current_unix_timestamp_ms, truncate_chars};
use herald_directory::UserDirectory;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::campaign::{Campaign, CampaignState, ProgressSnapshot};
use crate::delivery::DeliveryChannel;
use crate::error::BroadcastError;
use crate::job::{BroadcastJob, ProgressSink};
use crate::pacing::PacingPolicy;
use crate::report::{render_final_report, render_progress_message, render_start_message};

const RECEIPT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub admin_id: i64,
    pub pacing: PacingPolicy,
}

/// The single status message a campaign reports through.
///
/// The first `update` posts the message; later calls edit it in place.
#[async_trait]
pub trait StatusMessage: Send + Sync {
    async fn update(&self, text: &str) -> anyhow::Result<()>;

    /// Intermediate progress render. Implementations may drop it instead of
    /// waiting out rate limits; the next render or the final report replaces it.
    async fn update_progress(&self, text: &str) -> anyhow::Result<()> {
        self.update(text).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub campaign_id: String,
    pub total: usize,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReceipt {
    pub campaign_id: String,
    /// Cancellation had already been requested for this campaign.
    pub already_requested: bool,
    pub snapshot: ProgressSnapshot,
}

#[derive(Clone)]
pub struct BroadcastSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: SupervisorConfig,
    directory: Arc<dyn UserDirectory>,
    channel: Arc<dyn DeliveryChannel>,
    slot: Mutex<Slot>,
    idle_tx: watch::Sender<bool>,
    sequence: AtomicU64,
}

enum Slot {
    Idle,
    Preparing,
    Active(ActiveCampaign),
}

struct ActiveCampaign {
    campaign_id: String,
    state: CampaignState,
    started: Instant,
    cancel_tx: watch::Sender<bool>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
}

impl ActiveCampaign {
    fn snapshot(&self) -> ProgressSnapshot {
        let mut snapshot = *self.progress_rx.borrow();
        snapshot.state = self.state;
        if self.state.is_active() {
            snapshot.elapsed = self.started.elapsed();
        }
        snapshot
    }
}

impl SupervisorInner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_to_idle(&self, slot: &mut MutexGuard<'_, Slot>) {
        **slot = Slot::Idle;
        self.idle_tx.send_replace(true);
    }
}

impl BroadcastSupervisor {
    pub fn new(
        config: SupervisorConfig,
        directory: Arc<dyn UserDirectory>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                directory,
                channel,
                slot: Mutex::new(Slot::Idle),
                idle_tx,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_admin(&self, actor: i64) -> bool {
        actor == self.inner.config.admin_id
    }

    /// Validates the request, snapshots the directory and spawns the job.
    ///
    /// Request errors are returned before any campaign exists. The status
    /// message receives the start acknowledgement, progress renders and the
    /// final report from the job task.
    pub async fn start(
        &self,
        actor: i64,
        message_body: &str,
        status: Arc<dyn StatusMessage>,
    ) -> Result<StartReceipt, BroadcastError> {
        self.authorize(actor)?;
        let body = message_body.trim();
        if body.is_empty() {
            return Err(BroadcastError::EmptyMessage);
        }

        let reservation = self.reserve()?;
        let recipients = self.inner.directory.list_all().await.map_err(|error| {
            tracing::warn!("broadcast directory snapshot failed: {error}");
            BroadcastError::DirectoryUnavailable(error.to_string())
        })?;
        if recipients.is_empty() {
            return Err(BroadcastError::NoRecipients);
        }

        let campaign_id = self.next_campaign_id();
        let started = Instant::now();
        let campaign = Campaign::start(campaign_id.clone(), recipients, body);
        let total = campaign.total();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (job, progress_rx) = BroadcastJob::new(
            campaign,
            Arc::clone(&self.inner.channel),
            self.inner.config.pacing,
            cancel_rx,
        );
        let lease = reservation.activate(ActiveCampaign {
            campaign_id: campaign_id.clone(),
            state: CampaignState::Running,
            started,
            cancel_tx,
            progress_rx,
        });

        tracing::info!(
            campaign_id = campaign_id.as_str(),
            total,
            backend = self.inner.directory.backend_label(),
            "broadcast accepted"
        );
        tokio::spawn(run_campaign(job, status, lease));

        Ok(StartReceipt {
            campaign_id,
            total,
            preview: truncate_chars(body, RECEIPT_PREVIEW_CHARS),
        })
    }

    /// Requests cooperative cancellation of the running campaign.
    pub fn cancel(&self, actor: i64) -> Result<CancelReceipt, BroadcastError> {
        self.authorize(actor)?;
        self.request_cancel()
    }

    /// Latest progress of the campaign holding the slot.
    pub fn status(&self, actor: i64) -> Result<ProgressSnapshot, BroadcastError> {
        self.authorize(actor)?;
        match &*self.inner.lock_slot() {
            Slot::Active(active) => Ok(active.snapshot()),
            Slot::Idle | Slot::Preparing => Err(BroadcastError::NotRunning),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(*self.inner.lock_slot(), Slot::Idle)
    }

    /// Resolves once no campaign holds the slot.
    pub async fn wait_idle(&self) {
        let mut idle_rx = self.inner.idle_tx.subscribe();
        let _ = idle_rx.wait_for(|idle| *idle).await;
    }

    /// Cancels any running campaign and waits for its report to be emitted.
    pub async fn shutdown(&self) {
        match self.request_cancel() {
            Ok(receipt) => tracing::info!(
                campaign_id = receipt.campaign_id.as_str(),
                cursor = receipt.snapshot.cursor,
                total = receipt.snapshot.total,
                "cancelling broadcast for shutdown"
            ),
            Err(BroadcastError::NotRunning) if self.is_idle() => return,
            Err(_) => {}
        }
        self.wait_idle().await;
    }

    fn authorize(&self, actor: i64) -> Result<(), BroadcastError> {
        if self.is_admin(actor) {
            Ok(())
        } else {
            tracing::debug!(actor, "broadcast request refused");
            Err(BroadcastError::Unauthorized)
        }
    }

    fn reserve(&self) -> Result<SlotReservation, BroadcastError> {
        let mut slot = self.inner.lock_slot();
        if !matches!(*slot, Slot::Idle) {
            return Err(BroadcastError::AlreadyRunning);
        }
        *slot = Slot::Preparing;
        self.inner.idle_tx.send_replace(false);
        Ok(SlotReservation {
            inner: Arc::clone(&self.inner),
            armed: true,
        })
    }

    fn request_cancel(&self) -> Result<CancelReceipt, BroadcastError> {
        let mut slot = self.inner.lock_slot();
        let Slot::Active(active) = &mut *slot else {
            return Err(BroadcastError::NotRunning);
        };
        let already_requested = match active.state {
            CampaignState::Running => {
                active.state = CampaignState::Cancelling;
                active.cancel_tx.send_replace(true);
                false
            }
            CampaignState::Cancelling => true,
            CampaignState::Idle | CampaignState::Completed => {
                return Err(BroadcastError::NotRunning)
            }
        };
        tracing::info!(
            campaign_id = active.campaign_id.as_str(),
            already_requested,
            "broadcast cancellation requested"
        );
        Ok(CancelReceipt {
            campaign_id: active.campaign_id.clone(),
            already_requested,
            snapshot: active.snapshot(),
        })
    }

    fn next_campaign_id(&self) -> String {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("broadcast-{}-{sequence}", current_unix_timestamp_ms())
    }
}

/// Slot held in `Preparing` while the directory is read.
struct SlotReservation {
    inner: Arc<SupervisorInner>,
    armed: bool,
}

impl SlotReservation {
    fn activate(mut self, active: ActiveCampaign) -> SlotLease {
        let campaign_id = active.campaign_id.clone();
        *self.inner.lock_slot() = Slot::Active(active);
        self.armed = false;
        SlotLease {
            inner: Arc::clone(&self.inner),
            campaign_id,
        }
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.inner.lock_slot();
        if matches!(*slot, Slot::Preparing) {
            self.inner.release_to_idle(&mut slot);
        }
    }
}

/// Ownership of the slot by one campaign's job task.
struct SlotLease {
    inner: Arc<SupervisorInner>,
    campaign_id: String,
}

impl SlotLease {
    fn mark_completed(&self) {
        if let Slot::Active(active) = &mut *self.inner.lock_slot() {
            if active.campaign_id == self.campaign_id {
                active.state = CampaignState::Completed;
            }
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let mut slot = self.inner.lock_slot();
        if matches!(&*slot, Slot::Active(active) if active.campaign_id == self.campaign_id) {
            self.inner.release_to_idle(&mut slot);
        }
    }
}

struct RenderingSink {
    status: Arc<dyn StatusMessage>,
    message_body: Arc<str>,
}

#[async_trait]
impl ProgressSink for RenderingSink {
    async fn publish(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
        self.status
            .update_progress(&render_progress_message(snapshot, &self.message_body))
            .await
    }
}

async fn run_campaign(job: BroadcastJob, status: Arc<dyn StatusMessage>, lease: SlotLease) {
    let message_body: Arc<str> = Arc::from(job.campaign().message_body());
    let start_text = render_start_message(job.campaign().total(), &message_body);
    if let Err(error) = status.update(&start_text).await {
        tracing::warn!(
            campaign_id = lease.campaign_id.as_str(),
            "failed to post broadcast acknowledgement: {error:#}"
        );
    }

    let sink = RenderingSink {
        status: Arc::clone(&status),
        message_body,
    };
    let report = job.run(&sink).await;
    lease.mark_completed();

    if let Err(error) = status.update(&render_final_report(&report)).await {
        tracing::warn!(
            campaign_id = report.campaign_id.as_str(),
            "failed to render broadcast report: {error:#}"
        );
    }
    tracing::info!(
        campaign_id = report.campaign_id.as_str(),
        success = report.snapshot.success_count,
        failed = report.snapshot.failure_count,
        skipped = report.snapshot.skipped(),
        total = report.snapshot.total,
        cancelled = report.cancelled,
        elapsed_ms = report.snapshot.elapsed.as_millis() as u64,
        started_unix_ms = report.started_unix_ms,
        "broadcast finished"
    );
    drop(lease);
}
