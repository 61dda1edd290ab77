//! Completion provider: model identifiers, the backend trait, and the
//! OpenAI client implementation.

pub mod client;

pub use client::OpenAiClient;

use crate::command::ImageSize;
use crate::conversation::ChatThread;
use crate::error::LlmError;
use async_trait::async_trait;

/// Model identifiers the command grammar can select.
pub mod models {
    pub const CHAT_DEFAULT: &str = "gpt-3.5-turbo";
    pub const CHAT_GPT_4O: &str = "gpt-4o";
    pub const CHAT_GPT_4_TURBO: &str = "gpt-4-turbo";

    pub const IMAGE_DEFAULT: &str = "dall-e-2";
    pub const IMAGE_DALL_E_3: &str = "dall-e-3";

    /// The only chat model that accepts image input.
    pub const VISION: &str = CHAT_GPT_4O;
}

/// The assistant's side of one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// None when the provider returned an empty message.
    pub content: Option<String>,
}

/// Completion backend the engine calls. Implemented by [`OpenAiClient`];
/// tests inject scripted backends.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Run a chat completion over the thread's accumulated history.
    async fn chat_completion(&self, thread: &ChatThread) -> Result<Completion, LlmError>;

    /// Generate one image and return its download URL.
    async fn generate_image(
        &self,
        prompt: &str,
        model: &str,
        size: ImageSize,
    ) -> Result<String, LlmError>;

    /// Fetch generated image bytes over plain HTTP.
    async fn download(&self, url: &str) -> Result<Vec<u8>, LlmError>;
}
