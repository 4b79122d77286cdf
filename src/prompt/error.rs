use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("malformed persistence response: {0}")]
    Malformed(String),
    #[error("submission task {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Short stage name used in logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) => "generation",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Malformed(_) => "persistence-response",
            PipelineError::Aborted(_) => "task",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
