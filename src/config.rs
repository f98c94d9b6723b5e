use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::relay::poller::PollPolicy;

/// How the static API key is exchanged for a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenGrant {
    /// `POST {apikey}` as JSON, answered with `{token}`.
    #[default]
    ApiKey,
    /// IAM-style form grant, answered with `{access_token}`.
    Iam,
}

impl FromStr for TokenGrant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apikey" | "api_key" => Ok(TokenGrant::ApiKey),
            "iam" => Ok(TokenGrant::Iam),
            other => bail!("Unknown TOKEN_GRANT '{other}' (expected 'apikey' or 'iam')"),
        }
    }
}

/// Everything the relay needs to reach the orchestration API.
///
/// Built once at startup and shared read-only between requests.
#[derive(Clone)]
pub struct GatewayConfig {
    pub thread_endpoint: String,
    pub stream_endpoint: String,
    pub token_endpoint: String,
    pub api_key: String,
    pub token_grant: TokenGrant,
    /// Agent used by the simple chat route, which takes no `agent_id`.
    pub default_agent_id: Option<String>,
    pub poll: PollPolicy,
    pub stream_timeout_ms: u64,
    pub request_timeout: Duration,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("thread_endpoint", &self.thread_endpoint)
            .field("stream_endpoint", &self.stream_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("api_key", &"<redacted>")
            .field("token_grant", &self.token_grant)
            .field("default_agent_id", &self.default_agent_id)
            .field("poll", &self.poll)
            .field("stream_timeout_ms", &self.stream_timeout_ms)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

const DEFAULT_STREAM_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| var(key).with_context(|| format!("{key} is not set"));

        let thread_endpoint = required("THREAD_ENDPOINT")?;
        let token_endpoint = required("TOKEN_ENDPOINT")?;
        let api_key = required("API_KEY")?;

        // Streaming goes to the thread endpoint unless a dedicated one is given
        let stream_endpoint =
            var("STREAM_API_ENDPOINT").unwrap_or_else(|| thread_endpoint.clone());

        let token_grant = match var("TOKEN_GRANT") {
            Some(raw) => raw.parse()?,
            None => TokenGrant::default(),
        };

        let defaults = PollPolicy::default();
        let poll = PollPolicy {
            deadline: parse_secs(&var, "RELAY_POLL_TIMEOUT_SECS")?.unwrap_or(defaults.deadline),
            interval: parse_secs(&var, "RELAY_POLL_INTERVAL_SECS")?.unwrap_or(defaults.interval),
        };
        if poll.interval.is_zero() {
            bail!("RELAY_POLL_INTERVAL_SECS must be greater than zero");
        }

        let stream_timeout_ms = match var("RELAY_STREAM_TIMEOUT_MS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid RELAY_STREAM_TIMEOUT_MS '{raw}'"))?,
            None => DEFAULT_STREAM_TIMEOUT_MS,
        };

        let request_timeout = parse_secs(&var, "RELAY_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        Ok(Self {
            thread_endpoint,
            stream_endpoint,
            token_endpoint,
            api_key,
            token_grant,
            default_agent_id: var("AGENT_ID"),
            poll,
            stream_timeout_ms,
            request_timeout,
        })
    }

    /// URL of a single run's status resource.
    pub fn run_status_url(&self, run_id: &str) -> String {
        format!("{}/{}", self.thread_endpoint.trim_end_matches('/'), run_id)
    }
}

fn parse_secs<F>(var: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .with_context(|| format!("Invalid {key} '{raw}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("THREAD_ENDPOINT", "https://orchestrate.test/v1/threads"),
        ("TOKEN_ENDPOINT", "https://orchestrate.test/token"),
        ("API_KEY", "secret"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = GatewayConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.stream_endpoint, config.thread_endpoint);
        assert_eq!(config.token_grant, TokenGrant::ApiKey);
        assert_eq!(config.poll.deadline, Duration::from_secs(60));
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.stream_timeout_ms, 120_000);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.default_agent_id.is_none());
    }

    #[test]
    fn test_missing_required_variable() {
        let err = GatewayConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn test_blank_variable_counts_as_missing() {
        let mut pairs = BASE.to_vec();
        pairs.push(("AGENT_ID", "   "));
        let config = GatewayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.default_agent_id.is_none());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("STREAM_API_ENDPOINT", "https://orchestrate.test/v1/stream"),
            ("TOKEN_GRANT", "IAM"),
            ("AGENT_ID", "agent-7"),
            ("RELAY_POLL_TIMEOUT_SECS", "5"),
            ("RELAY_POLL_INTERVAL_SECS", "0.5"),
            ("RELAY_STREAM_TIMEOUT_MS", "3000"),
        ]);
        let config = GatewayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.stream_endpoint, "https://orchestrate.test/v1/stream");
        assert_eq!(config.token_grant, TokenGrant::Iam);
        assert_eq!(config.default_agent_id.as_deref(), Some("agent-7"));
        assert_eq!(config.poll.deadline, Duration::from_secs(5));
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.stream_timeout_ms, 3000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("RELAY_POLL_INTERVAL_SECS", "0"));
        assert!(GatewayConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("RELAY_POLL_TIMEOUT_SECS", "soon"));
        let err = GatewayConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("RELAY_POLL_TIMEOUT_SECS"));
    }

    #[test]
    fn test_run_status_url_trims_slash() {
        let mut pairs = BASE.to_vec();
        pairs[0] = ("THREAD_ENDPOINT", "https://orchestrate.test/v1/threads/");
        let config = GatewayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            config.run_status_url("run-1"),
            "https://orchestrate.test/v1/threads/run-1"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = GatewayConfig::from_lookup(lookup(&BASE)).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
    }
}
