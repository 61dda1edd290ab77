//! OpenAI HTTP client.

use crate::command::ImageSize;
use crate::conversation::ChatThread;
use crate::error::LlmError;
use crate::llm::{Completion, CompletionApi};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Thin client over the OpenAI chat-completions and image-generation
/// endpoints. The base URL is overridable for proxied deployments.
pub struct OpenAiClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(token: String, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        }
    }

    /// Check the response status; a 4xx with a provider error body becomes
    /// [`LlmError::InvalidRequest`] carrying the provider's message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("{status}: {body}"));
        if status.is_client_error() {
            Err(LlmError::InvalidRequest(message))
        } else {
            Err(LlmError::Api(message))
        }
    }
}

#[async_trait]
impl CompletionApi for OpenAiClient {
    async fn chat_completion(&self, thread: &ChatThread) -> Result<Completion, LlmError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "model": thread.model,
                "messages": thread.to_request_messages(),
            }))
            .send()
            .await?;

        let parsed: ChatCompletionResponse = Self::check(response).await?.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Api("completion returned no choices".into()))?;
        Ok(Completion {
            content: choice.message.content,
        })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        model: &str,
        size: ImageSize,
    ) -> Result<String, LlmError> {
        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "prompt": prompt,
                "model": model,
                "n": 1,
                "size": size.to_string(),
            }))
            .send()
            .await?;

        let parsed: ImageGenerationResponse = Self::check(response).await?.json().await?;
        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Api("image generation returned no images".into()))?;
        Ok(image.url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, LlmError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(LlmError::Download(format!(
                "{} fetching {url}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
