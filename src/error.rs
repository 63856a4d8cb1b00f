use thiserror::Error;

/// Relay-level failures. Validation variants come from the request itself;
/// `Provider` and `Store` wrap upstream failures and display the upstream
/// message so response envelopes echo it verbatim.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Empty message")]
    EmptyMessage,

    #[error("{0}")]
    Provider(String),

    #[error("History store error: {0}")]
    Store(String),
}

impl RelayError {
    /// True for errors the caller can fix by correcting the request.
    pub fn is_validation(&self) -> bool {
        matches!(self, RelayError::InvalidSource(_) | RelayError::EmptyMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_upstream_message_verbatim() {
        assert_eq!(RelayError::Provider("API Error".into()).to_string(), "API Error");
    }

    #[test]
    fn validation_classification() {
        assert!(RelayError::InvalidSource("slack".into()).is_validation());
        assert!(RelayError::EmptyMessage.is_validation());
        assert!(!RelayError::Provider("boom".into()).is_validation());
        assert!(!RelayError::Store("down".into()).is_validation());
    }
}
