use thiserror::Error;

/// Request-level failures of the administrative surface.
///
/// Each variant is returned before any campaign state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("not authorized")]
    Unauthorized,
    #[error("broadcast message is empty")]
    EmptyMessage,
    #[error("a broadcast is already in progress")]
    AlreadyRunning,
    #[error("no broadcast is currently running")]
    NotRunning,
    #[error("no users found to broadcast")]
    NoRecipients,
    #[error("user directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl BroadcastError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::EmptyMessage => "empty_message",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::NoRecipients => "no_recipients",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BroadcastError;

    #[test]
    fn unit_reason_codes_are_stable_snake_case() {
        let codes = [
            BroadcastError::Unauthorized,
            BroadcastError::EmptyMessage,
            BroadcastError::AlreadyRunning,
            BroadcastError::NotRunning,
            BroadcastError::NoRecipients,
            BroadcastError::DirectoryUnavailable("disk full".to_string()),
        ]
        .iter()
        .map(BroadcastError::reason_code)
        .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![
                "unauthorized",
                "empty_message",
                "already_running",
                "not_running",
                "no_recipients",
                "directory_unavailable"
            ]
        );
    }
}
