use anyhow::{bail, Context, Result};
use futures_util::StreamExt;

/// What to send to a running gateway.
pub struct ProbeArgs {
    pub base_url: String,
    pub query: String,
    pub agent_id: String,
    pub thread_id: Option<String>,
    pub stream: bool,
}

/// Call a running gateway once and print what comes back.
pub fn run(args: ProbeArgs) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if args.stream {
            probe_chat(&args).await
        } else {
            probe_get_result(&args).await
        }
    })
}

fn query_params(args: &ProbeArgs) -> Vec<(&'static str, &str)> {
    let mut params = vec![
        ("query", args.query.as_str()),
        ("agent_id", args.agent_id.as_str()),
    ];
    if let Some(thread_id) = &args.thread_id {
        params.push(("thread_id", thread_id.as_str()));
    }
    params
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

async fn probe_get_result(args: &ProbeArgs) -> Result<()> {
    println!("📡 Calling /get-result...");
    let res = reqwest::Client::new()
        .get(endpoint(&args.base_url, "get-result"))
        .query(&query_params(args))
        .send()
        .await
        .context("Calling /get-result")?;

    let status = res.status();
    let body: serde_json::Value = res.json().await.context("Parsing /get-result response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("/get-result returned {status}");
    }
    Ok(())
}

async fn probe_chat(args: &ProbeArgs) -> Result<()> {
    println!("💬 Calling /chat (stream)...");
    let res = reqwest::Client::new()
        .get(endpoint(&args.base_url, "chat"))
        .query(&query_params(args))
        .send()
        .await
        .context("Calling /chat")?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        bail!("/chat returned {status}: {body}");
    }

    let mut byte_stream = res.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.context("Reading /chat stream")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line: String = buffer.drain(..=line_end).collect();
            if let Some(data) = line.trim_end().strip_prefix("data: ") {
                println!("{data}");
            }
        }
    }
    Ok(())
}
