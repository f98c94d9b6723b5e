//! Agent invocation relay.
//!
//! Every invocation acquires a fresh token, resolves its thread, dispatches
//! the message and then either polls the run to completion or hands back a
//! normalized event stream. Nothing is shared between invocations except the
//! read-only [`GatewayConfig`].

mod credentials;
mod dispatch;
pub mod error;
pub mod poller;
mod session;
pub mod stream_parser;
pub mod types;

use garde::Validate;
use tracing::info;

use crate::config::GatewayConfig;

pub use error::{RelayError, RelayResult};
pub use poller::{poll_run, Clock, PollPolicy, PollState, TokioClock};
pub use stream_parser::EventStream;
pub use types::{Credential, InvocationRequest, NormalizedEvent, PollOutcome};

/// Connection to the orchestration API scoped to one invocation.
pub struct Upstream<'a> {
    config: &'a GatewayConfig,
    client: reqwest::Client,
}

impl<'a> Upstream<'a> {
    pub fn connect(config: &'a GatewayConfig) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(RelayError::transport("client setup"))?;
        Ok(Self { config, client })
    }
}

fn validate(request: &InvocationRequest) -> RelayResult<()> {
    request
        .validate()
        .map_err(|e| RelayError::InvalidRequest(e.to_string()))
}

/// Run a message to completion and return the run's result.
///
/// The thread is passed through when given but never created in this mode.
pub async fn invoke_poll(
    config: &GatewayConfig,
    request: &InvocationRequest,
) -> RelayResult<PollOutcome> {
    validate(request)?;
    info!(agent_id = %request.agent_id, "Poll invocation");

    let upstream = Upstream::connect(config)?;
    let token = upstream.acquire_token().await?;
    let run_id = upstream
        .dispatch_poll(
            &request.query,
            &request.agent_id,
            request.session_id.as_deref(),
            &token,
        )
        .await?;

    let clock = TokioClock::start();
    let result = poll_run(&clock, &config.poll, || upstream.fetch_run(&run_id, &token)).await?;

    info!(run_id = %run_id, "Run completed");
    Ok(PollOutcome::completed(result))
}

/// Open a streaming run, creating a thread first if the request has none.
///
/// Any upstream failure up to and including the initial response status is
/// returned here, before a single event is produced.
pub async fn invoke_stream(
    config: &GatewayConfig,
    request: &InvocationRequest,
) -> RelayResult<EventStream> {
    validate(request)?;
    info!(agent_id = %request.agent_id, "Stream invocation");

    let upstream = Upstream::connect(config)?;
    let token = upstream.acquire_token().await?;
    let thread_id = upstream
        .resolve_session(&request.query, &token, request.session_id.as_deref())
        .await?;

    upstream
        .dispatch_stream(&request.query, &request.agent_id, &thread_id, &token)
        .await
}
