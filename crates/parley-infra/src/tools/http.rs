//! HTTP client for an external tool gateway.
//!
//! The gateway owns each user's connected tool providers (search, GitHub,
//! ...) and exposes them as:
//!
//! - `GET  {base}/providers/{provider}/tools?user_id={user}` returning
//!   `{"tools": [{"name", "description", "parameters_schema"}]}`
//! - `POST {base}/providers/{provider}/tools/{name}/invoke` with body
//!   `{"user_id", "arguments"}`, returning `{"result": ...}`

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::tools::ToolConnectionProvider;
use parley_types::tool::{RemoteTool, ToolError};

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    #[serde(default)]
    tools: Vec<RemoteTool>,
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    user_id: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Value,
}

/// [`ToolConnectionProvider`] backed by a tool gateway over HTTP.
#[derive(Clone)]
pub struct HttpToolConnectionProvider {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpToolConnectionProvider {
    /// Create a client for the gateway at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("tool gateway URL cannot be a base: {base_url}");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Base was checked in `new`, so the segments can always be pushed.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn connection_error(provider: &str, message: impl std::fmt::Display) -> ToolError {
    ToolError::Connection {
        provider: provider.to_string(),
        message: message.to_string(),
    }
}

impl ToolConnectionProvider for HttpToolConnectionProvider {
    async fn list_tools(&self, provider: &str, user_id: &str) -> Result<Vec<RemoteTool>, ToolError> {
        let url = self.endpoint(&["providers", provider, "tools"]);
        tracing::debug!(provider, user_id, "Listing gateway tools");

        let response = self
            .client
            .get(url)
            .query(&[("user_id", user_id)])
            .send()
            .await
            .map_err(|e| connection_error(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(connection_error(provider, format!("HTTP {status}: {body}")));
        }

        let listing: ListToolsResponse = response
            .json()
            .await
            .map_err(|e| connection_error(provider, format!("invalid tool listing: {e}")))?;
        Ok(listing.tools)
    }

    async fn invoke(
        &self,
        provider: &str,
        user_id: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let url = self.endpoint(&["providers", provider, "tools", tool_name, "invoke"]);

        let response = self
            .client
            .post(url)
            .json(&InvokeRequest {
                user_id,
                arguments: args,
            })
            .send()
            .await
            .map_err(|e| connection_error(provider, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(tool_name.to_string()));
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::InvalidArguments(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Invocation {
                tool: tool_name.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let body: InvokeResponse = response.json().await.map_err(|e| ToolError::Invocation {
            tool: tool_name.to_string(),
            message: format!("invalid invoke response: {e}"),
        })?;
        Ok(body.result)
    }
}
