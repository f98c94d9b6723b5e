use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::config::GatewayConfig;
use crate::relay::{self, EventStream, InvocationRequest, NormalizedEvent, PollOutcome};

use super::dto::{ChatRequest, ChatResponse, HealthStatus, InvokeParams, ServiceInfo};
use super::error::{ApiError, ApiResult};
use super::extractors::{ValidJson, ValidQuery};

const SERVICE_NAME: &str = "Orchestrate Relay";
const NO_REPLY: &str = "I received your message but couldn't generate a response.";

/// GET /
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: SERVICE_NAME,
        version: crate::VERSION,
    })
}

/// GET /health
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

/// GET /get-result
pub async fn get_result(
    State(config): State<Arc<GatewayConfig>>,
    ValidQuery(params): ValidQuery<InvokeParams>,
) -> ApiResult<Json<PollOutcome>> {
    let outcome = relay::invoke_poll(&config, &params.into()).await?;
    Ok(Json(outcome))
}

/// GET /chat
///
/// Failures before the first event become an HTTP error. A failure after
/// that ends the feed with a single `error_message: true` record.
pub async fn chat_stream(
    State(config): State<Arc<GatewayConfig>>,
    ValidQuery(params): ValidQuery<InvokeParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let events = relay::invoke_stream(&config, &params.into()).await?;
    let keep_alive = KeepAlive::new().interval(Duration::from_secs(30));
    Ok(Sse::new(relay_events(events)).keep_alive(keep_alive))
}

/// SSE body for one run. Stops after the first failure record.
fn relay_events(mut events: EventStream) -> impl Stream<Item = Result<Event, Infallible>> {
    let thread_id = events.session_id().to_string();

    async_stream::stream! {
        let mut relayed = 0usize;
        while let Some(item) = events.next().await {
            let record = match item {
                Ok(event) => event,
                Err(e) => NormalizedEvent::failure(e.to_string(), &thread_id),
            };
            let terminal = record.error;

            match Event::default().json_data(&record) {
                Ok(sse) => {
                    relayed += 1;
                    yield Ok(sse);
                }
                Err(e) => error!(thread_id = %thread_id, error = %e, "Failed to encode event"),
            }

            if terminal {
                break;
            }
        }
        info!(thread_id = %thread_id, relayed, "Stream finished");
    }
}

/// POST /api/chat
pub async fn simple_chat(
    State(config): State<Arc<GatewayConfig>>,
    ValidJson(body): ValidJson<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let agent_id = config
        .default_agent_id
        .clone()
        .ok_or_else(|| {
            ApiError::BadRequest("No default agent configured (AGENT_ID)".to_string())
        })?;

    let request = InvocationRequest::new(body.message, agent_id);
    let outcome = relay::invoke_poll(&config, &request).await?;
    debug!(result = %outcome.result, "Simple chat completed");

    Ok(Json(ChatResponse {
        response: reply_text(&outcome.result),
        status: "success".to_string(),
    }))
}

/// Pick the human-readable reply out of a run result.
fn reply_text(result: &serde_json::Value) -> String {
    if let Some(text) = result.as_str() {
        return text.to_string();
    }

    ["/output/message", "/response", "/output"]
        .iter()
        .find_map(|p| result.pointer(p).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if result.is_null() {
                NO_REPLY.to_string()
            } else {
                result.to_string()
            }
        })
}
