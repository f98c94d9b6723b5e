use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::relay::InvocationRequest;

/// Query string of `/get-result` and `/chat`.
#[derive(Debug, Deserialize, Validate)]
pub struct InvokeParams {
    #[garde(length(min = 1))]
    pub query: String,
    #[garde(length(min = 1))]
    pub agent_id: String,
    #[serde(default)]
    #[garde(skip)]
    pub thread_id: Option<String>,
}

impl From<InvokeParams> for InvocationRequest {
    fn from(params: InvokeParams) -> Self {
        InvocationRequest::new(params.query, params.agent_id).with_session(params.thread_id)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[garde(length(min = 1))]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
}
