use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Attachments total {actual} bytes, above the {limit} byte limit")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("Form '{0}' contains files but does not accept queued files")]
    FileTypeNotQueueable(String),

    #[error("Replay of '{id}' failed: {reason}")]
    ReplayFailure { id: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

impl From<rusqlite::Error> for OutboxError {
    fn from(err: rusqlite::Error) -> Self {
        OutboxError::StorageUnavailable(err.to_string())
    }
}

impl OutboxError {
    /// Text shown on the status surface when this error stops a capture or a sync pass.
    pub fn user_message(&self) -> String {
        match self {
            OutboxError::StorageUnavailable(_) => {
                "Could not save offline. Please try again when connected.".to_string()
            }
            OutboxError::SizeLimitExceeded { limit, .. } => format!(
                "Attachments are too large to save offline (limit {} KB). Please reconnect to submit.",
                limit / 1024
            ),
            OutboxError::FileTypeNotQueueable(_) => {
                "This form's files cannot be saved offline. Please reconnect to submit.".to_string()
            }
            OutboxError::ReplayFailure { .. } | OutboxError::NetworkError(_) => {
                "Sync interrupted, will retry.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether the error refused an offline capture (nothing was written).
    pub fn is_capture_refusal(&self) -> bool {
        matches!(
            self,
            OutboxError::SizeLimitExceeded { .. } | OutboxError::FileTypeNotQueueable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OutboxError::StorageUnavailable("disk full".to_string());
        assert_eq!(err.to_string(), "Storage unavailable: disk full");

        let err = OutboxError::SizeLimitExceeded {
            actual: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Attachments total 2048 bytes, above the 1024 byte limit"
        );

        let err = OutboxError::FileTypeNotQueueable("/tests/submit".to_string());
        assert_eq!(
            err.to_string(),
            "Form '/tests/submit' contains files but does not accept queued files"
        );

        let err = OutboxError::ReplayFailure {
            id: "abc".to_string(),
            reason: "HTTP 500".to_string(),
        };
        assert_eq!(err.to_string(), "Replay of 'abc' failed: HTTP 500");
    }

    #[test]
    fn test_user_messages() {
        let err = OutboxError::SizeLimitExceeded {
            actual: 4096,
            limit: 2048,
        };
        assert!(err.user_message().contains("limit 2 KB"));
        assert!(err.is_capture_refusal());

        let err = OutboxError::ReplayFailure {
            id: "abc".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(err.user_message(), "Sync interrupted, will retry.");
        assert!(!err.is_capture_refusal());
    }

    #[test]
    fn test_sqlite_error_maps_to_storage_unavailable() {
        let err: OutboxError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, OutboxError::StorageUnavailable(_)));
    }
}
