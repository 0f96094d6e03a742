//! Typed error hierarchy for the stagegate core.
//!
//! Every public core operation returns `Result<T, PipelineError>`. Storage and
//! file-layer internals use `anyhow` with context and surface here through the
//! transparent `Storage` variant.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state for {entity} {id}: expected {expected}, found {actual}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        actual: String,
        expected: String,
    },

    #[error("Execution {id} exceeded its maximum of {max} revision iterations")]
    RevisionLimitExceeded { id: String, max: u32 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to archive {path}: {source}")]
    ArchiveFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl Into<String>,
        actual: impl ToString,
        expected: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            id: id.into(),
            actual: actual.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by the caller's request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidStateTransition { .. }
                | Self::RevisionLimitExceeded { .. }
                | Self::Validation(_)
        )
    }
}
