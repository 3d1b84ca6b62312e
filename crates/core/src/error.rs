use thiserror::Error;

use crate::domain::ErrorType;

/// Faults raised by a unit of work while producing its events.
///
/// None of these ever leave the runner: each one is classified with
/// [`UnitError::error_type`] and turned into an `error` envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("{unit}: unsupported granularity: {granularity}")]
    UnsupportedGranularity { unit: String, granularity: String },

    #[error("{unit}: {message}")]
    Execution {
        unit: String,
        message: String,
        granularity: Option<String>,
    },

    #[error("{unit}: configuration error: {message}")]
    Configuration { unit: String, message: String },

    #[error("Unexpected fault: {0}")]
    Unexpected(String),

    #[error("Execution cancelled")]
    Cancelled,
}

impl UnitError {
    /// Create a plugin-level execution error.
    pub fn execution(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            unit: unit.into(),
            message: message.into(),
            granularity: None,
        }
    }

    /// Create a configuration error.
    pub fn configuration(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Attach the granularity that failed. Only execution errors carry one.
    pub fn with_granularity(self, granularity: impl Into<String>) -> Self {
        match self {
            Self::Execution { unit, message, .. } => Self::Execution {
                unit,
                message,
                granularity: Some(granularity.into()),
            },
            other => other,
        }
    }

    /// Granularity reported by the unit, if any.
    pub fn granularity(&self) -> Option<&str> {
        match self {
            Self::Execution { granularity, .. } => granularity.as_deref(),
            Self::UnsupportedGranularity { granularity, .. } => Some(granularity),
            _ => None,
        }
    }

    /// Classification surfaced in the `error_type` payload field.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::UnsupportedGranularity { .. }
            | Self::Execution { .. }
            | Self::Configuration { .. } => ErrorType::PluginError,
            Self::Unexpected(_) | Self::Cancelled => ErrorType::UnexpectedError,
        }
    }
}

pub type Result<T> = std::result::Result<T, UnitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = UnitError::execution("beta", "boom");
        assert_eq!(error.to_string(), "beta: boom");

        let error = UnitError::UnsupportedGranularity {
            unit: "alpha".to_string(),
            granularity: "synthesis".to_string(),
        };
        assert!(error.to_string().contains("synthesis"));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            UnitError::execution("a", "x").error_type(),
            ErrorType::PluginError
        );
        assert_eq!(
            UnitError::configuration("a", "missing mapping").error_type(),
            ErrorType::PluginError
        );
        assert_eq!(
            UnitError::Unexpected("panic".to_string()).error_type(),
            ErrorType::UnexpectedError
        );
    }

    #[test]
    fn test_with_granularity() {
        let error = UnitError::execution("a", "x").with_granularity("analysis");
        assert_eq!(error.granularity(), Some("analysis"));

        let error = UnitError::Cancelled.with_granularity("analysis");
        assert_eq!(error.granularity(), None);
    }
}
