use thiserror::Error;

use crate::engine::EvalError;

/// Errors surfaced by the script runtime to the workflow engine
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script failed to parse or threw while running
    #[error("script evaluation failed: {0}")]
    Evaluation(EvalError),

    /// The script asked to abort the current workflow step; the run continues
    #[error("step aborted: {0}")]
    StepAborted(String),

    /// A new interpreter instance could not be built; it was discarded
    #[error("failed to construct interpreter instance: {0}")]
    Construction(String),

    /// A blocking evaluation task panicked or was cancelled
    #[error("script task failed: {0}")]
    Join(String),
}

impl ScriptError {
    /// Whether the workflow engine should skip the step rather than fail the run
    pub fn is_step_abort(&self) -> bool {
        matches!(self, ScriptError::StepAborted(_))
    }
}

impl From<EvalError> for ScriptError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::StepAborted(reason) => ScriptError::StepAborted(reason),
            other => ScriptError::Evaluation(other),
        }
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
