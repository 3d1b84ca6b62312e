use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid selection: {}", describe_selection(.unknown, .duplicates))]
    InvalidSelection {
        unknown: Vec<String>,
        duplicates: Vec<String>,
    },

    #[error("Unit already registered: {0}")]
    DuplicateUnit(String),

    #[error("Invalid unit {name:?}: {reason}")]
    InvalidUnit { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn invalid_unit(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUnit {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

fn describe_selection(unknown: &[String], duplicates: &[String]) -> String {
    let mut parts = Vec::new();
    if !unknown.is_empty() {
        parts.push(format!("unknown units: {}", unknown.join(", ")));
    }
    if !duplicates.is_empty() {
        parts.push(format!("duplicate units: {}", duplicates.join(", ")));
    }
    parts.join("; ")
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
