use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use relay_shared::{
    relay_provider, ActionContext, ActionDescriptor, ActionProvider, CancellationToken, ParamSpec,
    ParamType, ProviderConfig, ProviderManifest, RelayError, RelayResult,
};

pub const HTTP_FETCH: &str = "http_fetch";

#[relay_provider(
    name = "net.fetch",
    description = "Fetches HTTP resources from allowlisted hosts with a hard request timeout.",
    version = "0.1.0",
    config_keys = ["allowed_hosts", "timeout_secs", "max_body_bytes"],
    tags = ["#NET", "#TOOL"]
)]
pub struct FetchProvider {
    client: reqwest::Client,
    allowed_hosts: HashSet<String>,
    timeout_ms: u64,
    max_body_bytes: usize,
}

fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Resolves once the token is cancelled; dropping the request future aborts it.
async fn cancelled(token: &CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        if token.is_cancelled() {
            return;
        }
    }
}

impl FetchProvider {
    pub async fn new_provider(config: ProviderConfig) -> anyhow::Result<Self> {
        // Hosts are pre-lowercased; an empty allowlist denies everything
        let allowed_hosts = config
            .config_values
            .get("allowed_hosts")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let timeout_secs: u64 = config
            .config_values
            .get("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let max_body_bytes = config
            .config_values
            .get("max_body_bytes")
            .and_then(|v| v.parse().ok())
            .unwrap_or(65536);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()?,
            allowed_hosts,
            timeout_ms: timeout_secs * 1000,
            max_body_bytes,
        })
    }

    fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.contains(&host.to_lowercase())
    }

    async fn http_fetch(&self, params: Value, ctx: ActionContext) -> RelayResult<Value> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidArgument("url must be a string".into()))?;
        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");

        let url = reqwest::Url::parse(url)
            .map_err(|e| RelayError::InvalidArgument(format!("invalid url: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::InvalidArgument("url has no host".into()))?;

        if !self.is_host_allowed(host) {
            tracing::warn!(host = %host, "🚫 Host is not in the allowlist");
            return Err(RelayError::InvalidArgument(format!(
                "access to host '{}' is denied by policy",
                host
            )));
        }

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| RelayError::InvalidArgument(format!("invalid method '{}'", method)))?;

        ctx.checkpoint("cancelled before sending request")?;
        tracing::info!(method = %method, url = %url, "🌐 Fetching");

        let request = self.client.request(method, url.clone()).send();
        tokio::pin!(request);

        let response = tokio::select! {
            result = &mut request => result,
            () = cancelled(&ctx.cancellation) => {
                return Err(RelayError::Cancelled(
                    "fetch cancelled; request aborted".to_string(),
                ));
            }
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                RelayError::Timeout {
                    action: HTTP_FETCH.to_string(),
                    timeout_ms: self.timeout_ms,
                }
            } else {
                RelayError::Execution(format!("request failed: {:#}", e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Execution(format!("failed to read body: {}", e)))?;

        ctx.reporter
            .running(1, 1, format!("received {} bytes (status {})", body.len(), status))
            .await;

        Ok(json!({
            "status": status,
            "body": safe_truncate(&body, self.max_body_bytes),
            "truncated": body.len() > self.max_body_bytes,
        }))
    }
}

#[async_trait]
impl ActionProvider for FetchProvider {
    fn manifest(&self) -> ProviderManifest {
        self.auto_manifest()
    }

    fn descriptors(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(
            HTTP_FETCH,
            "Fetch an HTTP resource from an allowlisted host.",
        )
        .with_param("url", ParamSpec::required(ParamType::String))
        .with_param("method", ParamSpec::optional(ParamType::String, json!("GET")))
        .returning("status code and response body")]
    }

    async fn execute(
        &self,
        action: &str,
        params: Value,
        ctx: ActionContext,
    ) -> RelayResult<Value> {
        match action {
            HTTP_FETCH => self.http_fetch(params, ctx).await,
            other => Err(RelayError::ActionNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::ProgressReporter;

    fn provider(hosts: &[&str]) -> FetchProvider {
        FetchProvider {
            client: reqwest::Client::new(),
            allowed_hosts: hosts.iter().map(|h| h.to_lowercase()).collect(),
            timeout_ms: 30_000,
            max_body_bytes: 1024,
        }
    }

    fn ctx() -> ActionContext {
        ActionContext::new(ProgressReporter::disabled(), CancellationToken::new())
    }

    #[test]
    fn test_host_allowlist_is_case_insensitive() {
        let p = provider(&["Api.Example.Com"]);
        assert!(p.is_host_allowed("api.example.com"));
        assert!(p.is_host_allowed("API.EXAMPLE.COM"));
        assert!(!p.is_host_allowed("evil.example.net"));
    }

    #[test]
    fn test_empty_allowlist_denies_everything() {
        let p = provider(&[]);
        assert!(!p.is_host_allowed("example.com"));
    }

    #[tokio::test]
    async fn test_disallowed_host_rejected_before_request() {
        let err = provider(&["api.example.com"])
            .http_fetch(json!({"url": "https://evil.example.net/x"}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = provider(&["api.example.com"])
            .http_fetch(json!({"url": "not a url"}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let err = provider(&["api.example.com"])
            .http_fetch(
                json!({"url": "https://api.example.com/x", "method": "NOT A METHOD"}),
                ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[test]
    fn test_body_truncation_boundary() {
        assert_eq!(safe_truncate("abcdef", 4), "abcd");
        assert_eq!(safe_truncate("a€b", 2), "a");
    }
}
