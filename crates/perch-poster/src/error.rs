/// Failure talking to the posting service.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    #[error("posting service is not configured")]
    Disabled,
    #[error("post text is empty")]
    Empty,
    #[error("post is {chars} characters, limit is {max}")]
    TooLong { chars: usize, max: usize },
    #[error("credentials: {0}")]
    Credentials(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited{}", reset_suffix(.reset))]
    RateLimited { reset: Option<u64> },
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

fn reset_suffix(reset: &Option<u64>) -> String {
    reset.map(|r| format!(", resets at {r}")).unwrap_or_default()
}

impl PostError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Empty => "empty",
            Self::TooLong { .. } => "too_long",
            Self::Credentials(_) => "credentials",
            Self::Network(_) => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::Decode(_) => "decode",
        }
    }
}
