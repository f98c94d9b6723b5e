use serde::Deserialize;
use tracing::{debug, info};

use super::error::{RelayError, RelayResult};
use super::stream_parser::EventStream;
use super::types::{Credential, RunCreateBody, RunStatus, UpstreamMessage};
use super::Upstream;

#[derive(Deserialize)]
struct RunCreated {
    #[serde(default)]
    run_id: Option<String>,
}

impl Upstream<'_> {
    /// Submit a message for blocking execution and return the new run id.
    pub async fn dispatch_poll(
        &self,
        query: &str,
        agent_id: &str,
        thread_id: Option<&str>,
        token: &Credential,
    ) -> RelayResult<String> {
        let body = RunCreateBody {
            message: UpstreamMessage::user(query),
            agent_id,
            thread_id,
        };

        let res = self
            .client
            .post(&self.config.thread_endpoint)
            .bearer_auth(token.bearer())
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(RelayError::transport("run dispatch"))?;

        let status = res.status().as_u16();
        let text = res
            .text()
            .await
            .map_err(RelayError::transport("run dispatch"))?;

        if status != 200 {
            return Err(RelayError::UpstreamDispatch { status, body: text });
        }

        let run_id = serde_json::from_str::<RunCreated>(&text)
            .ok()
            .and_then(|r| r.run_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::UpstreamDispatch {
                status,
                body: text.clone(),
            })?;

        info!(agent_id, run_id = %run_id, "Dispatched run");
        Ok(run_id)
    }

    /// Open a streaming run. Fails before any data when the upstream answers
    /// with anything but 200.
    pub async fn dispatch_stream(
        &self,
        query: &str,
        agent_id: &str,
        thread_id: &str,
        token: &Credential,
    ) -> RelayResult<EventStream> {
        let body = RunCreateBody {
            message: UpstreamMessage::user(query),
            agent_id,
            thread_id: Some(thread_id),
        };
        let stream_timeout = self.config.stream_timeout_ms.to_string();

        // No request timeout: the body stays open for the whole run
        let res = self
            .client
            .post(&self.config.stream_endpoint)
            .bearer_auth(token.bearer())
            .query(&[
                ("stream", "true"),
                ("stream_timeout", stream_timeout.as_str()),
                ("multiple_content", "true"),
            ])
            .json(&body)
            .send()
            .await
            .map_err(RelayError::transport("stream dispatch"))?;

        let status = res.status().as_u16();
        if status != 200 {
            let body = res.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamDispatch { status, body });
        }

        info!(agent_id, thread_id, "Opened run stream");
        Ok(EventStream::from_response(res, thread_id))
    }

    /// Fetch the current state of a run.
    pub async fn fetch_run(&self, run_id: &str, token: &Credential) -> RelayResult<RunStatus> {
        let res = self
            .client
            .get(self.config.run_status_url(run_id))
            .bearer_auth(token.bearer())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(RelayError::transport("run status"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(RelayError::transport("run status"))?;

        if !status.is_success() {
            return Err(RelayError::RunStatus {
                status: status.as_u16(),
                body,
            });
        }

        let run: RunStatus = serde_json::from_str(&body).map_err(|_| RelayError::RunStatus {
            status: status.as_u16(),
            body: body.clone(),
        })?;
        debug!(run_id, status = ?run.status, "Fetched run status");
        Ok(run)
    }
}
