use serde::Deserialize;
use tracing::{debug, info};

use super::error::{RelayError, RelayResult};
use super::types::{Credential, ThreadCreateBody, UpstreamMessage};
use super::Upstream;

#[derive(Deserialize)]
struct ThreadResponse {
    #[serde(default)]
    thread_id: Option<String>,
}

impl Upstream<'_> {
    /// Return the caller's thread if one was given, otherwise open a new one
    /// seeded with the first user message.
    ///
    /// An existing id is passed through unchecked; a stale one only surfaces
    /// when the run is dispatched.
    pub async fn resolve_session(
        &self,
        query: &str,
        token: &Credential,
        existing: Option<&str>,
    ) -> RelayResult<String> {
        if let Some(thread_id) = existing.filter(|id| !id.is_empty()) {
            debug!(thread_id, "Reusing existing thread");
            return Ok(thread_id.to_string());
        }

        let body = ThreadCreateBody {
            message: UpstreamMessage::user(query),
            stream: true,
        };

        let res = self
            .client
            .post(&self.config.thread_endpoint)
            .bearer_auth(token.bearer())
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(RelayError::transport("thread creation"))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamSession(format!("({status}) {body}")));
        }

        let thread: ThreadResponse = res
            .json()
            .await
            .map_err(|e| RelayError::UpstreamSession(format!("malformed thread response: {e}")))?;

        let thread_id = thread
            .thread_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RelayError::UpstreamSession("thread_id missing from response".to_string())
            })?;

        info!(thread_id = %thread_id, "Created thread");
        Ok(thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::config_for;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    #[tokio::test]
    async fn test_existing_thread_skips_creation() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/threads"))
                .times(0)
                .respond_with(status_code(500)),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        let id = upstream
            .resolve_session("hi", &Credential::new("tok"), Some("thread-9"))
            .await
            .unwrap();
        assert_eq!(id, "thread-9");
    }

    #[tokio::test]
    async fn test_creates_thread_with_first_message() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/threads"),
                request::headers(contains(("authorization", "Bearer tok"))),
                request::body(json_decoded(eq(serde_json::json!({
                    "message": {"role": "user", "content": "hi"},
                    "stream": true
                })))),
            ])
            .times(1)
            .respond_with(json_encoded(serde_json::json!({"thread_id": "thread-1"}))),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        let id = upstream
            .resolve_session("hi", &Credential::new("tok"), None)
            .await
            .unwrap();
        assert_eq!(id, "thread-1");
    }

    #[tokio::test]
    async fn test_missing_thread_id_is_session_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/threads"))
                .respond_with(json_encoded(serde_json::json!({"id": "nope"}))),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        let err = upstream
            .resolve_session("hi", &Credential::new("tok"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UpstreamSession(_)));
    }

    #[tokio::test]
    async fn test_failed_creation_is_session_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/threads"))
                .respond_with(status_code(403).body("forbidden")),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        match upstream
            .resolve_session("hi", &Credential::new("tok"), None)
            .await
        {
            Err(RelayError::UpstreamSession(msg)) => assert!(msg.contains("forbidden")),
            other => panic!("Expected UpstreamSession, got {other:?}"),
        }
    }
}
