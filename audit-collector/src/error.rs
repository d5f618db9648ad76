//! Error types shared by the engine and the adapters

use thiserror::Error;

/// Failure of a single accessor call (tag fetch, registry lookup, metric query,
/// sub-resource discovery). Always isolated to the value it was computing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AccessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound(_))
    }

    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        AccessError::Service {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Batch and configuration level errors
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Invalid metric window: {0}")]
    InvalidWindow(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inventory unavailable: every selected service failed to list ({0})")]
    InventoryUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguished() {
        assert!(AccessError::NotFound("stack".into()).is_not_found());
        assert!(!AccessError::Transport("timeout".into()).is_not_found());
        assert!(!AccessError::service("Throttling", "slow down").is_not_found());
    }

    #[test]
    fn test_service_error_display() {
        let err = AccessError::service("AccessDeniedException", "no cloudwatch:GetMetricStatistics");
        assert_eq!(
            err.to_string(),
            "Service error AccessDeniedException: no cloudwatch:GetMetricStatistics"
        );
    }

    #[test]
    fn test_inventory_unavailable_display() {
        let err = AuditError::InventoryUnavailable("s3, sqs".into());
        assert!(err.to_string().contains("s3, sqs"));
    }
}
