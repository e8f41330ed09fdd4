//! Action error types.

use std::time::Duration;

use thiserror::Error;

use statlane_core::ActionOutput;

/// Result delivered to whoever queued an action.
pub type ActionResult = Result<ActionOutput, ActionError>;

/// Why an action did not produce an output.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The execution budget ran out before processing finished. The
    /// in-flight work was cancelled; writes it already committed remain.
    #[error("{action_type} timed out after {after:?}")]
    Timeout {
        action_type: String,
        after: Duration,
    },

    #[error("{action_type} failed: {source:#}")]
    Failed {
        action_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// Discarded from the queue before it started.
    #[error("{action_type} was removed from the queue before it ran")]
    Cancelled { action_type: String },
}

impl ActionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::Timeout { .. })
    }

    pub fn action_type(&self) -> &str {
        match self {
            ActionError::Timeout { action_type, .. }
            | ActionError::Failed { action_type, .. }
            | ActionError::Cancelled { action_type } => action_type,
        }
    }
}
