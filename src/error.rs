use thiserror::Error;

/// Failure reported by an [`Evaluator`](crate::evaluator::Evaluator) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EvaluationError(pub String);

/// Failure reported by an optional persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistence backend unavailable: {0}")]
pub struct PersistenceError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("malformed state key `{key}`: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("action index {index} out of range ({len} legal actions)")]
    InvalidAction { index: usize, len: usize },

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("side to move has no legal action")]
    NoLegalAction,

    #[error("search tree invariant violated: {0}")]
    CorruptTree(String),
}

impl Error {
    /// Fatal errors mean corrupted internal state or a failed predictor; the
    /// episode is abandoned. The rest are environment-level and retryable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::MalformedKey { .. } | Error::CorruptTree(_) | Error::Evaluation(_) => true,
            Error::InvalidAction { .. } | Error::NoLegalAction => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
