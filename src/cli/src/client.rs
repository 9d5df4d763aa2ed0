//! HTTP client for communicating with the PakMirror API server.

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// API response wrapper matching the server's ApiResponse format.
#[derive(Debug, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[allow(dead_code)]
    pub error_code: Option<String>,
}

/// HTTP client for the PakMirror API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;
        Ok(resp)
    }

    async fn unwrap_envelope<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        let api_resp: ApiResponse<T> = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse response from {} ({}): {}", url, status, body))?;

        if api_resp.success {
            api_resp
                .data
                .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
        } else {
            Err(anyhow::anyhow!(
                "API error ({}): {}",
                status,
                api_resp.error.unwrap_or_else(|| "Unknown error".into())
            ))
        }
    }

    /// Perform a GET request and deserialize the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(Method::GET, path, None).await?;
        Self::unwrap_envelope(resp, path).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let resp = self.send(Method::POST, path, Some(body)).await?;
        Self::unwrap_envelope(resp, path).await
    }

    /// Perform a DELETE request and deserialize the response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(Method::DELETE, path, None).await?;
        Self::unwrap_envelope(resp, path).await
    }

    /// Perform a PATCH request and deserialize the response.
    pub async fn patch<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(Method::PATCH, path, None).await?;
        Self::unwrap_envelope(resp, path).await
    }

    /// Perform a GET request returning plain text (logs, reports).
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let resp = self.send(Method::GET, path, None).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        resp.text().await.context("Failed to read response body")
    }

    /// Follow a server-sent event stream, invoking `on_line` for every
    /// `data:` payload until the server closes the stream.
    pub async fn follow_events<F>(&self, path: &str, mut on_line: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        let url = format!("{}{}", self.base_url, path);
        // No overall timeout: event streams are open-ended.
        let client = Client::builder()
            .build()
            .context("Failed to create streaming HTTP client")?;
        let resp = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("event stream interrupted")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                if let Some(data) = line.strip_prefix("data:") {
                    on_line(data.trim_start());
                }
            }
        }
        Ok(())
    }
}
