use thiserror::Error;

/// Failure raised by a lifecycle observer
///
/// Returned from `saving` or `deleting` it aborts the operation before any
/// write; from later stages it rolls the transaction back.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error(
        "Observer rejected the record: {message}{}",
        .hint.as_ref().map(|h| format!(" (hint: {})", h)).unwrap_or_default()
    )]
    Validation {
        message: String,
        hint: Option<String>,
    },

    #[error("Observer failed: {message}")]
    Observer { message: String },

    #[error("Lifecycle stopped: {reason}")]
    PropagationStopped { reason: String },
}

impl EventError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn observer(message: impl Into<String>) -> Self {
        Self::Observer {
            message: message.into(),
        }
    }

    pub fn propagation_stopped(reason: impl Into<String>) -> Self {
        Self::PropagationStopped {
            reason: reason.into(),
        }
    }

    /// Operation was refused rather than broken
    pub fn is_veto(&self) -> bool {
        !matches!(self, Self::Observer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            EventError::validation_with_hint("locked page", "unlock it first").to_string(),
            "Observer rejected the record: locked page (hint: unlock it first)"
        );
        assert_eq!(
            EventError::validation("locked page").to_string(),
            "Observer rejected the record: locked page"
        );
        assert_eq!(
            EventError::propagation_stopped("archived record").to_string(),
            "Lifecycle stopped: archived record"
        );
    }

    #[test]
    fn test_veto_classification() {
        assert!(EventError::propagation_stopped("read only").is_veto());
        assert!(EventError::validation("bad").is_veto());
        assert!(!EventError::observer("mailer down").is_veto());
    }
}
