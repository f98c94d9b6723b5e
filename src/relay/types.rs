use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived bearer token. Fetched per invocation and never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One user message addressed to one agent. Poll or stream mode is chosen
/// by the operation it is handed to.
#[derive(Debug, Clone, Validate)]
pub struct InvocationRequest {
    #[garde(length(min = 1))]
    pub query: String,
    #[garde(length(min = 1))]
    pub agent_id: String,
    #[garde(skip)]
    pub session_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(query: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            agent_id: agent_id.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.trim().is_empty());
        self
    }
}

/// A chat message as the orchestration API expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: String,
}

impl UpstreamMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ThreadCreateBody {
    pub message: UpstreamMessage,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RunCreateBody<'a> {
    pub message: UpstreamMessage,
    pub agent_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<&'a str>,
}

/// Upstream run state. Anything unrecognised still counts as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Completed,
    Failed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatus {
    #[serde(default)]
    pub status: Option<RunState>,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Successful result of a poll-mode invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollOutcome {
    pub message: String,
    pub result: serde_json::Value,
}

pub const TASK_COMPLETED_MESSAGE: &str = "✅ Task completed.";

impl PollOutcome {
    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            message: TASK_COMPLETED_MESSAGE.to_string(),
            result,
        }
    }
}

/// One text fragment relayed to the caller of a streaming invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedEvent {
    #[serde(rename = "error_message")]
    pub error: bool,
    #[serde(rename = "response")]
    pub text: String,
    #[serde(rename = "thread_id")]
    pub session_id: String,
}

impl NormalizedEvent {
    pub fn text(text: impl Into<String>, session_id: &str) -> Self {
        Self {
            error: false,
            text: text.into(),
            session_id: session_id.to_string(),
        }
    }

    pub fn failure(message: impl Into<String>, session_id: &str) -> Self {
        Self {
            error: true,
            text: message.into(),
            session_id: session_id.to_string(),
        }
    }
}
