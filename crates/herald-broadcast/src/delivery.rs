//! Delivery channel contract and outcome taxonomy.

use async_trait::async_trait;

/// Result of one delivery attempt to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient blocked the sender or no longer exists.
    RecipientUnreachable { detail: String },
    TransientChannelError { detail: String },
    UnknownError { detail: String },
}

impl DeliveryOutcome {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::RecipientUnreachable {
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::TransientChannelError {
            detail: detail.into(),
        }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::UnknownError {
            detail: detail.into(),
        }
    }

    /// `None` for a successful delivery.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Delivered => None,
            Self::RecipientUnreachable { .. } => Some(FailureReason::Unreachable),
            Self::TransientChannelError { .. } => Some(FailureReason::Transient),
            Self::UnknownError { .. } => Some(FailureReason::Unknown),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::RecipientUnreachable { detail }
            | Self::TransientChannelError { detail }
            | Self::UnknownError { detail } => Some(detail.as_str()),
        }
    }
}

/// Reason code recorded for a failed recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Unreachable,
    Transient,
    Unknown,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        }
    }
}

/// One-message-at-a-time transport to a single recipient.
///
/// Implementations classify every failure themselves; anything they cannot
/// classify is reported as [`DeliveryOutcome::UnknownError`].
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, recipient_id: i64, body: &str) -> DeliveryOutcome;
}
