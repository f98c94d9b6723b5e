use serde::Deserialize;
use tracing::debug;

use super::error::{RelayError, RelayResult};
use super::types::Credential;
use super::Upstream;
use crate::config::TokenGrant;

const IAM_APIKEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl Upstream<'_> {
    /// Exchange the configured API key for a fresh bearer token.
    ///
    /// Called once per invocation; tokens are never reused.
    pub async fn acquire_token(&self) -> RelayResult<Credential> {
        let config = self.config;
        let request = self
            .client
            .post(&config.token_endpoint)
            .timeout(config.request_timeout);

        let request = match config.token_grant {
            TokenGrant::ApiKey => {
                request.json(&serde_json::json!({ "apikey": config.api_key }))
            }
            TokenGrant::Iam => request.form(&[
                ("grant_type", IAM_APIKEY_GRANT),
                ("apikey", config.api_key.as_str()),
            ]),
        };

        let res = request
            .send()
            .await
            .map_err(RelayError::transport("token exchange"))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamAuth(format!("({status}) {body}")));
        }

        let body: TokenResponse = res
            .json()
            .await
            .map_err(|e| RelayError::UpstreamAuth(format!("malformed token response: {e}")))?;

        let token = match config.token_grant {
            TokenGrant::ApiKey => body.token,
            TokenGrant::Iam => body.access_token,
        };

        match token.filter(|t| !t.is_empty()) {
            Some(t) => {
                debug!("Acquired upstream token");
                Ok(Credential::new(t))
            }
            None => Err(RelayError::UpstreamAuth(
                "token missing from exchange response".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::config_for;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    #[tokio::test]
    async fn test_apikey_exchange() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(json_decoded(eq(serde_json::json!({"apikey": "test-key"})))),
            ])
            .respond_with(json_encoded(serde_json::json!({"token": "tok-1"}))),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        let cred = upstream.acquire_token().await.unwrap();
        assert_eq!(cred.bearer(), "tok-1");
    }

    #[tokio::test]
    async fn test_iam_exchange() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(url_decoded(contains(("apikey", "test-key")))),
                request::body(url_decoded(contains(("grant_type", IAM_APIKEY_GRANT)))),
            ])
            .respond_with(json_encoded(serde_json::json!({"access_token": "iam-tok"}))),
        );

        let mut config = config_for(&server);
        config.token_grant = TokenGrant::Iam;
        let upstream = Upstream::connect(&config).unwrap();
        let cred = upstream.acquire_token().await.unwrap();
        assert_eq!(cred.bearer(), "iam-tok");
    }

    #[tokio::test]
    async fn test_non_success_status_is_auth_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .respond_with(status_code(401).body("bad key")),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        let err = upstream.acquire_token().await.unwrap_err();
        match err {
            RelayError::UpstreamAuth(msg) => assert!(msg.contains("bad key")),
            other => panic!("Expected UpstreamAuth, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_token_field_is_auth_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .respond_with(json_encoded(serde_json::json!({"expires_in": 3600}))),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        assert!(matches!(
            upstream.acquire_token().await,
            Err(RelayError::UpstreamAuth(_))
        ));
    }

    #[tokio::test]
    async fn test_non_json_body_is_auth_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .respond_with(status_code(200).body("<html>")),
        );

        let config = config_for(&server);
        let upstream = Upstream::connect(&config).unwrap();
        assert!(matches!(
            upstream.acquire_token().await,
            Err(RelayError::UpstreamAuth(_))
        ));
    }
}
