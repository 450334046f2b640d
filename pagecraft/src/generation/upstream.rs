//! Client for the OpenAI-compatible chat completions API of the model provider.

use std::time::Duration;

use async_openai::types::chat::{CreateChatCompletionRequest, CreateChatCompletionResponse};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::config::GenerationConfig;
use crate::errors::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, TLS or timeout failure
    #[error("request to model provider failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("model provider returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The response body did not have the expected shape
    #[error("invalid response from model provider: {0}")]
    InvalidResponse(String),

    /// The provider returned no content
    #[error("model provider returned an empty completion")]
    EmptyCompletion,
}

impl From<UpstreamError> for Error {
    fn from(err: UpstreamError) -> Self {
        let message = match &err {
            UpstreamError::Request(e) if e.is_timeout() => "Model provider timed out".to_string(),
            UpstreamError::Request(_) => "Failed to reach model provider".to_string(),
            UpstreamError::Status { message, .. } => message.clone(),
            UpstreamError::InvalidResponse(_) => "Invalid response from model provider".to_string(),
            UpstreamError::EmptyCompletion => "Model provider returned no code".to_string(),
        };
        tracing::warn!(error = %err, "Upstream generation failed");
        Error::Upstream { message }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: String },
    Plain(String),
}

/// Pull a human-readable message out of a provider error body.
fn provider_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorBody::Detailed { message } | ErrorBody::Plain(message),
        }) if !message.trim().is_empty() => message,
        _ => format!("Model provider returned {status}"),
    }
}

/// `<base_url>/v1/chat/completions`, keeping any path prefix on `base_url`.
fn completions_endpoint(base_url: &Url) -> Result<Url, url::ParseError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("v1/chat/completions")
}

/// Thin wrapper over a shared `reqwest::Client` pointed at the provider.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        crate::install_crypto_provider();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Self::with_client(http, config)
    }

    pub fn with_client(http: reqwest::Client, config: &GenerationConfig) -> anyhow::Result<Self> {
        let endpoint = completions_endpoint(&config.base_url)?;
        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    async fn send(&self, request: &CreateChatCompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        let mut builder = self.http.post(self.endpoint.clone()).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status,
                message: provider_error_message(status, &body),
            });
        }
        Ok(response)
    }

    /// One blocking completion. Returns the raw message content.
    #[instrument(skip_all, fields(model = %request.model), err)]
    pub async fn complete(&self, request: &CreateChatCompletionRequest) -> Result<String, UpstreamError> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        let parsed: CreateChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::InvalidResponse("no choices in response".to_string()))?;

        if content.trim().is_empty() {
            return Err(UpstreamError::EmptyCompletion);
        }
        Ok(content)
    }

    /// Start a streaming completion. The status is checked before any byte is relayed.
    #[instrument(skip_all, fields(model = %request.model), err)]
    pub async fn stream(&self, request: &CreateChatCompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationInput;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GenerationConfig {
        GenerationConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    fn request(stream: bool) -> CreateChatCompletionRequest {
        let config = GenerationConfig::default();
        GenerationInput::parse("Build a login form", None, &config)
            .unwrap()
            .to_request(&config, stream)
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "created": 1_704_067_200,
            "model": "deepseek-chat",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
    }

    #[test]
    fn test_completions_endpoint_keeps_path_prefix() {
        let endpoint = |base: &str| completions_endpoint(&Url::parse(base).unwrap()).unwrap().to_string();

        assert_eq!(endpoint("https://api.deepseek.com"), "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(endpoint("https://api.groq.com/openai"), "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(endpoint("https://api.groq.com/openai/"), "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn test_provider_error_message() {
        let body = r#"{"error":{"message":"Insufficient Balance","type":"unknown_error"}}"#;
        assert_eq!(provider_error_message(StatusCode::PAYMENT_REQUIRED, body), "Insufficient Balance");
        assert_eq!(provider_error_message(StatusCode::BAD_REQUEST, r#"{"error":"bad model"}"#), "bad model");
        assert_eq!(
            provider_error_message(StatusCode::BAD_GATEWAY, "<html>"),
            "Model provider returned 502 Bad Gateway"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_complete_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "deepseek-chat", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("<!DOCTYPE html>")))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let content = client.complete(&request(false)).await.unwrap();

        assert_eq!(content, "<!DOCTYPE html>");
    }

    #[test_log::test(tokio::test)]
    async fn test_base_url_with_path_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("<div></div>")))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.base_url = Url::parse(&format!("{}/openai", server.uri())).unwrap();
        let client = UpstreamClient::new(&config).unwrap();

        assert_eq!(client.complete(&request(false)).await.unwrap(), "<div></div>");
    }

    #[test_log::test(tokio::test)]
    async fn test_complete_maps_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "Rate limit reached"}})))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let err = client.complete(&request(false)).await.unwrap_err();

        match err {
            UpstreamError::Status { status, message } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_complete_rejects_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        assert!(matches!(
            client.complete(&request(false)).await.unwrap_err(),
            UpstreamError::EmptyCompletion
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_complete_rejects_unexpected_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "<div></div>"})))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        assert!(matches!(
            client.complete(&request(false)).await.unwrap_err(),
            UpstreamError::InvalidResponse(_)
        ));
    }
}
