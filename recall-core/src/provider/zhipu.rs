//! Zhipu (BigModel) provider implementation.
//!
//! Speaks the OpenAI-compatible `/embeddings` and `/chat/completions`
//! endpoints with bearer authentication. Chat responses are streamed as
//! server-sent events.

use super::types::*;
use crate::config::ProviderConfig;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Zhipu HTTP API provider.
#[derive(Debug, Clone)]
pub struct ZhipuProvider {
    base_url: String,
    api_key: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl ZhipuProvider {
    /// Creates a provider from config.
    ///
    /// Fails with [`ProviderError::Config`] when no API key is configured, so
    /// a misconfigured deployment never reaches the network.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let timeout = config.timeout();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProviderError::Request)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            http_client,
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for ZhipuProvider {
    async fn chat<'a>(
        &'a self,
        request: ChatRequest,
        mut callback: Box<dyn FnMut(ChatResponse) + Send + 'a>,
    ) -> Result<()> {
        let zhipu_request = ZhipuChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self.post("chat/completions", &zhipu_request).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.drain(..=newline_pos).collect::<Vec<_>>();
                let line_str = String::from_utf8_lossy(&line);

                let Some(data) = line_str.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();

                if data == "[DONE]" {
                    debug!(model = %request.model, "Chat stream finished");
                    return Ok(());
                }

                match serde_json::from_str::<ZhipuChatChunk>(data) {
                    Ok(chunk) => {
                        for choice in chunk.choices {
                            callback(ChatResponse {
                                model: chunk.model.clone().unwrap_or_else(|| request.model.clone()),
                                content: choice.delta.content.unwrap_or_default(),
                                done: choice.finish_reason.is_some(),
                            });
                        }
                    }
                    Err(e) => trace!(error = %e, "Skipping unparseable stream line"),
                }
            }
        }

        Ok(())
    }

    async fn embed(&self, request: &EmbedRequest) -> Result<Vec<f32>> {
        let response = self.post("embeddings", request).await?;

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;
        let embed_response: EmbedResponse = serde_json::from_str(&body)?;

        embed_response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ProviderError::Api("No embeddings returned".to_string()))
    }
}

// Zhipu-specific request/response types (internal)

#[derive(Debug, Serialize)]
struct ZhipuChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ZhipuChatChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ZhipuChoice>,
}

#[derive(Debug, Deserialize)]
struct ZhipuChoice {
    #[serde(default)]
    delta: ZhipuDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZhipuDelta {
    #[serde(default)]
    content: Option<String>,
}
