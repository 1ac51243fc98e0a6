//! Error types for TallyChat.

use thiserror::Error;

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Missing or malformed credentials, or an out-of-range parameter.
    /// Raised at startup, never at request time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The running cost has reached the budget limit; no request was sent.
    #[error("Budget exceeded: spent ${current_cost:.4} of ${limit:.2}")]
    BudgetExceeded { current_cost: f64, limit: f64 },

    /// The remote model call failed or returned an error status.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A cache or conversation snapshot could not be written or read.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A mode switch named a preset that does not exist.
    #[error("Unknown mode '{requested}'. Valid modes: {}", valid.join(", "))]
    UnknownMode {
        requested: String,
        valid: Vec<&'static str>,
    },

    /// A session id that is not 1-64 ASCII letters, digits, `-` or `_`.
    #[error("Invalid session id '{0}': use 1-64 letters, digits, '-' or '_'")]
    InvalidSession(String),

    /// The stream consumer went away before the reply completed.
    #[error("Request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TallyError {
    /// Short machine-readable kind, used in HTTP responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Provider(_) => "upstream_error",
            Self::Persistence(_) | Self::Io(_) | Self::Json(_) => "persistence_error",
            Self::UnknownMode { .. } => "unknown_mode",
            Self::InvalidSession(_) => "invalid_session",
            Self::Cancelled => "cancelled",
        }
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_))
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exceeded_display() {
        let err = TallyError::BudgetExceeded {
            current_cost: 0.6,
            limit: 0.5,
        };
        assert_eq!(err.to_string(), "Budget exceeded: spent $0.6000 of $0.50");
        assert_eq!(err.kind(), "budget_exceeded");
    }

    #[test]
    fn test_unknown_mode_lists_valid_presets() {
        let err = TallyError::UnknownMode {
            requested: "pirate".into(),
            valid: vec!["default", "concise"],
        };
        let msg = err.to_string();
        assert!(msg.contains("pirate"));
        assert!(msg.contains("default, concise"));
    }

    #[test]
    fn test_io_error_maps_to_persistence_kind() {
        let err: TallyError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), "persistence_error");
    }
}
