use thiserror::Error;

use crate::engine::types::{Next, StageId};

/// Rejections raised while merging a stage delta into the State Record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("compliance score {0} is outside [0, 100]")]
    InvalidScore(f64),

    #[error("execution already produced its final output; no further mutation allowed")]
    Terminal,

    #[error("stage '{0}' is not registered in the graph")]
    UnknownStage(StageId),
}

/// Errors surfaced by the execution engine to its callers.
///
/// Stage-local failures never appear here: they are recorded in the State
/// Record and reported through the final output.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A router returned a successor outside its declared set.
    #[error("stage '{stage}' routed to '{next}', which is not a declared successor")]
    Routing { stage: StageId, next: Next },

    /// The stage graph is misconfigured.
    #[error("invalid stage graph: {0}")]
    Graph(String),

    /// The suspend/resume store failed to save or load a snapshot.
    #[error("snapshot store failure for execution '{execution_id}': {message}")]
    SuspendStore {
        execution_id: String,
        message: String,
    },

    #[error("execution '{0}' not found")]
    NotFound(String),

    /// Another call is already driving this execution identity.
    #[error("execution '{0}' is already running")]
    Busy(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("execution '{execution_id}' cannot {action} while {status}")]
    InvalidState {
        execution_id: String,
        action: &'static str,
        status: String,
    },
}

impl EngineError {
    pub(crate) fn store(execution_id: &str, err: anyhow::Error) -> Self {
        EngineError::SuspendStore {
            execution_id: execution_id.to_string(),
            message: format!("{:#}", err),
        }
    }
}

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
