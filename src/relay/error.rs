pub type RelayResult<T> = Result<T, RelayError>;

/// Failures of a single invocation. None of them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Failed to get access token: {0}")]
    UpstreamAuth(String),

    #[error("Failed to create thread: {0}")]
    UpstreamSession(String),

    #[error("Error from orchestration API ({status}): {body}")]
    UpstreamDispatch { status: u16, body: String },

    #[error("Failed to fetch run status ({status}): {body}")]
    RunStatus { status: u16, body: String },

    #[error("❌ Task failed.")]
    TaskFailed,

    #[error("⏱️ Polling timed out.")]
    PollTimeout,

    #[error("Upstream stream failed: {0}")]
    UpstreamStream(String),

    #[error("Transport error during {step}: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl RelayError {
    pub(crate) fn transport(step: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| RelayError::Transport { step, source }
    }
}
