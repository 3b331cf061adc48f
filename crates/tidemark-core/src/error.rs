use thiserror::Error;

/// Engine-level errors raised before anything touches the graph store.
#[derive(Error, Debug)]
pub enum TidemarkError {
    #[error("Missing injected value: {name}")]
    MissingInjectedValue { name: String },

    #[error("Scope mismatch for {label}: {reason}")]
    ScopeMismatch { label: String, reason: String },

    #[error("Invalid schema {label}: {reason}")]
    InvalidSchema { label: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TidemarkError {
    pub(crate) fn invalid_schema(label: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            label: label.to_string(),
            reason: reason.into(),
        }
    }
}
