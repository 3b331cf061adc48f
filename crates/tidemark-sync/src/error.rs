//! Error types for the tidemark-sync crate.

use std::fmt;

use thiserror::Error;

/// The step of a scope's pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Transform,
    Load,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// A fetch or transform collaborator failed.
    #[error("{stage} failed for scope {scope}: {source:#}")]
    Collaborator {
        stage: Stage,
        scope: String,
        #[source]
        source: anyhow::Error,
    },

    /// A load or cleanup call failed after all retries.
    #[error("{stage} of {label} failed for scope {scope}: {source}")]
    Store {
        stage: Stage,
        scope: String,
        label: String,
        #[source]
        source: tidemark_graph::GraphError,
    },

    #[error("Invalid module {module}: {source}")]
    InvalidModule {
        module: String,
        #[source]
        source: tidemark_core::TidemarkError,
    },

    #[error("Scope task for {scope} panicked or was cancelled: {reason}")]
    Task { scope: String, reason: String },

    #[error("Journal error: {0}")]
    Journal(#[from] tidemark_journal::JournalError),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Collaborator { stage, .. } | Self::Store { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
