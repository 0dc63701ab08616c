//! OpenAI-compatible streaming chat completions client
//!
//! Talks to Groq by default. Each streaming attempt pulls the first content
//! item before handing the stream back, so authentication and quota failures
//! surface here and a rate-limited model can fall through to the next
//! configured one. [`ChatCompletionsClient::complete`] is the non-streaming
//! variant over the same model chain.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::sse::into_chunk_stream;
use super::{ChunkStream, CompletionError, CompletionParams, CompletionService};
use crate::config::CompletionConfig;
use crate::conversation::OutgoingMessage;
use crate::metrics::METRICS;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming client for `/chat/completions` endpoints
pub struct ChatCompletionsClient {
    http: Client,
    config: CompletionConfig,
    breaker: Arc<CircuitBreaker>,
}

impl ChatCompletionsClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CompletionError::RequestFailed(e.to_string()))?;

        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failures,
            reset_timeout: config.breaker_reset_timeout(),
        }));

        Ok(Self { http, config, breaker })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn api_key(&self) -> Result<&SecretString, CompletionError> {
        self.config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                CompletionError::NotConfigured("no API key; set GROQ_API_KEY".to_string())
            })
    }

    /// Complete without streaming, trying the same model chain
    pub async fn complete(
        &self,
        system_prompt: &str,
        messages: &[OutgoingMessage],
        params: &CompletionParams,
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key()?;
        info!(
            "Requesting completion: messages={}, max_tokens={}, urgent={}",
            messages.len(),
            params.max_tokens,
            params.urgent
        );

        self.with_fallback(move |model| async move {
            let request = build_request(&model, system_prompt, messages, params, false);
            let response = self.send(api_key, &request).await?;
            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

            body.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.is_empty())
                .ok_or_else(|| {
                    CompletionError::MalformedResponse("no content in response".to_string())
                })
        })
        .await
    }

    async fn send(
        &self,
        api_key: &SecretString,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<Response, CompletionError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited(body));
        }
        Err(CompletionError::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    async fn open_with_model(
        &self,
        model: &str,
        api_key: &SecretString,
        system_prompt: &str,
        messages: &[OutgoingMessage],
        params: &CompletionParams,
    ) -> Result<ChunkStream, CompletionError> {
        let request = build_request(model, system_prompt, messages, params, true);
        let response = self.send(api_key, &request).await?;

        let mut items = into_chunk_stream(response.bytes_stream().eventsource().boxed());

        match items.next().await {
            Some(Ok(first)) => {
                debug!("First stream item received from {}", model);
                Ok(futures::stream::once(async move { Ok(first) })
                    .chain(items)
                    .boxed())
            }
            Some(Err(e)) => Err(e),
            None => Err(CompletionError::MalformedStream("empty stream".to_string())),
        }
    }

    /// Run `attempt` against each configured model in order
    ///
    /// Models with an open breaker are skipped. Only rate limiting moves on to
    /// the next model; any other failure ends the chain.
    async fn with_fallback<T, F, Fut>(&self, mut attempt: F) -> Result<T, CompletionError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let mut last_error = None;

        for (index, model) in self.config.models().into_iter().enumerate() {
            if self.breaker.is_open(&model) {
                warn!("Skipping model {}: circuit breaker open", model);
                METRICS
                    .completion_circuit_open
                    .with_label_values(&[model.as_str()])
                    .inc();
                last_error = Some(CompletionError::CircuitOpen(model));
                continue;
            }

            debug!("Trying model {}", model);
            match attempt(model.clone()).await {
                Ok(value) => {
                    self.breaker.mark_success(&model);
                    METRICS
                        .completion_attempts
                        .with_label_values(&[model.as_str(), "success"])
                        .inc();
                    if index > 0 {
                        METRICS.completion_fallbacks.inc();
                    }
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.mark_failure(&model);
                    let rate_limited = e.is_rate_limited();
                    let status = if rate_limited { "rate_limited" } else { "error" };
                    METRICS
                        .completion_attempts
                        .with_label_values(&[model.as_str(), status])
                        .inc();
                    warn!("Model {} failed: {}", model, e);

                    last_error = Some(e);
                    if !rate_limited {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CompletionError::NotConfigured("no models configured".to_string())))
    }
}

fn build_request<'a>(
    model: &'a str,
    system_prompt: &'a str,
    messages: &'a [OutgoingMessage],
    params: &CompletionParams,
    stream: bool,
) -> ChatCompletionRequest<'a> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(WireMessage {
        role: "system",
        content: system_prompt,
    });
    wire.extend(messages.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));

    ChatCompletionRequest {
        model,
        messages: wire,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        stream,
    }
}

#[async_trait]
impl CompletionService for ChatCompletionsClient {
    async fn open_stream(
        &self,
        system_prompt: &str,
        messages: &[OutgoingMessage],
        params: &CompletionParams,
    ) -> Result<ChunkStream, CompletionError> {
        let api_key = self.api_key()?;
        info!(
            "Opening completion stream: messages={}, max_tokens={}, urgent={}",
            messages.len(),
            params.max_tokens,
            params.urgent
        );

        self.with_fallback(move |model| async move {
            self.open_with_model(&model, api_key, system_prompt, messages, params)
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    fn params() -> CompletionParams {
        CompletionParams {
            temperature: 0.7,
            max_tokens: 2048,
            urgent: false,
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let client = ChatCompletionsClient::new(CompletionConfig::default()).unwrap();
        let messages = vec![OutgoingMessage::new(Role::User, "hi")];

        let result = client.open_stream("system", &messages, &params()).await;
        assert!(matches!(result, Err(CompletionError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_blank_api_key_is_not_configured() {
        let mut config = CompletionConfig::default();
        config.api_key = Some(SecretString::new("   ".to_string()));
        let client = ChatCompletionsClient::new(config).unwrap();

        let result = client.open_stream("system", &[], &params()).await;
        assert!(matches!(result, Err(CompletionError::NotConfigured(_))));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "llama-3.3-70b-versatile",
            messages: vec![
                WireMessage { role: "system", content: "be kind" },
                WireMessage { role: "user", content: "hello" },
            ],
            temperature: 0.5,
            max_tokens: 64,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 64);
    }

    #[test]
    fn test_response_without_content_parses() {
        let body: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(body.choices[0].message.content.is_none());

        let body: ChatCompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(body.choices.is_empty());
    }
}
