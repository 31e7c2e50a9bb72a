//! Disaster recovery error types

use thiserror::Error;

/// Disaster recovery error types
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Compute environment call failed (network/cloud, untyped at this layer)
    #[error("Environment error: {message}")]
    Environment { message: String },

    /// Region has no backup region configured
    #[error("No backup region mapped for {region}")]
    RegionNotMapped { region: String },

    /// Snapshot manager failure
    #[error("Snapshot manager error [{code}]: {message}")]
    SnapshotManager {
        code: &'static str,
        message: String,
    },

    /// Failover detector failure
    #[error("Failover detector error [{code}]: {message}")]
    FailoverDetector {
        code: &'static str,
        message: String,
    },

    /// Restoration orchestrator failure
    #[error("Restoration orchestrator error [{code}]: {message}")]
    RestorationOrchestrator {
        code: &'static str,
        message: String,
    },

    /// Disaster recovery controller failure
    #[error("Controller error [{code}]: {message}")]
    Controller {
        code: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl RecoveryError {
    /// Machine-readable code of the error, when one exists.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::SnapshotManager { code, .. }
            | Self::FailoverDetector { code, .. }
            | Self::RestorationOrchestrator { code, .. }
            | Self::Controller { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Shorthand for an untyped environment failure.
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }
}

/// Disaster recovery result type
pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_error_display() {
        let error = RecoveryError::environment("connection reset by peer");
        assert!(error
            .to_string()
            .contains("Environment error: connection reset by peer"));
        assert_eq!(error.code(), None);
    }

    #[test]
    fn test_region_not_mapped_error() {
        let error = RecoveryError::RegionNotMapped {
            region: "nyc3".to_string(),
        };
        assert!(error.to_string().contains("No backup region mapped"));
        assert!(error.to_string().contains("nyc3"));
    }

    #[test]
    fn test_coded_component_errors() {
        let error = RecoveryError::RestorationOrchestrator {
            code: "NO_SNAPSHOTS",
            message: "no restorable tenants in plan".to_string(),
        };
        assert_eq!(error.code(), Some("NO_SNAPSHOTS"));
        let error_str = error.to_string();
        assert!(error_str.contains("[NO_SNAPSHOTS]"));
        assert!(error_str.contains("no restorable tenants"));

        let error = RecoveryError::SnapshotManager {
            code: "TRANSFER_REJECTED",
            message: "target region refused transfer".to_string(),
        };
        assert_eq!(error.code(), Some("TRANSFER_REJECTED"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error = RecoveryError::from(json_error);
        match error {
            RecoveryError::Json { .. } => assert!(error.to_string().contains("JSON error")),
            _ => panic!("Expected Json variant"),
        }
    }

    #[test]
    fn test_send_sync_traits() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RecoveryError>();
        assert_sync::<RecoveryError>();
    }
}
