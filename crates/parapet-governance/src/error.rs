use parapet_types::{AlertId, AlertStatus};
use thiserror::Error;

/// Errors from the governance layer.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("alert not found: {0}")]
    AlertNotFound(AlertId),

    #[error("alert {id} already resolved as {status}")]
    AlertAlreadyResolved { id: AlertId, status: AlertStatus },

    #[error("unknown workflow action: '{0}'")]
    InvalidAction(String),

    #[error("governance store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl GovernanceError {
    /// Whether the gate must treat this as "state unreadable" and fail
    /// closed rather than surface the error as an allowed action.
    pub fn fails_closed(&self) -> bool {
        matches!(
            self,
            GovernanceError::StoreUnavailable(_) | GovernanceError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_fail_closed() {
        assert!(GovernanceError::StoreUnavailable("down".into()).fails_closed());
        assert!(GovernanceError::Storage("io".into()).fails_closed());
        assert!(!GovernanceError::InvalidAction("demolish".into()).fails_closed());
    }

    #[test]
    fn resolved_error_names_status() {
        let err = GovernanceError::AlertAlreadyResolved {
            id: AlertId::new(),
            status: AlertStatus::Approved,
        };
        assert!(err.to_string().contains("approved"));
    }
}
