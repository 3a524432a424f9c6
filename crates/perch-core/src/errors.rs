use crate::protocol::{error_outcome, Outcome};

/// Failure raised inside a command handler.
///
/// Handlers never let these reach the connection: the worker renders them as
/// an `{"error": "..."}` reply and the connection carries on.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum HandlerError {
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("store error: {0}")]
    Store(String),
    #[error("posting failed: {0}")]
    Posting(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    /// Short classification for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "missing_param",
            Self::InvalidParam { .. } => "invalid_param",
            Self::Store(_) => "store",
            Self::Posting(_) => "posting",
            Self::Internal(_) => "internal",
        }
    }

    pub fn to_outcome(&self) -> Outcome {
        error_outcome(self.to_string())
    }
}
