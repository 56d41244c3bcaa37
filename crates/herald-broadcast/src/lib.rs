//! Single-flight, cancellable broadcast fan-out.
//!
//! A [`BroadcastSupervisor`] gates administrator requests and owns the one
//! campaign slot. Each accepted request snapshots the user directory into a
//! [`Campaign`] and hands it to a [`BroadcastJob`], which delivers the message
//! to every recipient in order through a [`DeliveryChannel`], pacing sends and
//! publishing [`ProgressSnapshot`]s until it finishes or is cancelled.

pub mod campaign;
pub mod delivery;
pub mod error;
pub mod job;
pub mod pacing;
pub mod report;
pub mod supervisor;

pub use campaign::{Campaign, CampaignReport, CampaignState, ProgressSnapshot, RecipientFailure};
pub use delivery::{DeliveryChannel, DeliveryOutcome, FailureReason};
pub use error::BroadcastError;
pub use herald_directory::Recipient;
pub use job::{BroadcastJob, ProgressSink};
pub use pacing::PacingPolicy;
pub use report::{
    render_final_report, render_progress_message, render_start_message, FAILED_LISTING_LIMIT,
};
pub use supervisor::{
    BroadcastSupervisor, CancelReceipt, StartReceipt, StatusMessage, SupervisorConfig,
};
