//! Conversation thread state: the message history persisted per thread root.

use crate::prompts::SYSTEM_PREAMBLE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System { content: String },
    User { content: UserContent },
    Assistant { content: String },
}

/// User-turn payload: plain text or an inline base64 image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserContent {
    Text(String),
    /// A `data:image/<subtype>;base64,...` URL.
    ImageUrl(String),
}

/// Accumulated history for one conversation thread.
///
/// Updates are copy-on-write: the builder methods consume the thread and
/// return a new one, so concurrent handlers never mutate shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatThread {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatThread {
    /// Start a new thread: system preamble followed by the initiating prompt.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![
                ChatMessage::System {
                    content: SYSTEM_PREAMBLE.to_owned(),
                },
                ChatMessage::User {
                    content: UserContent::Text(prompt.into()),
                },
            ],
        }
    }

    /// Append a user text turn.
    pub fn with_user_text(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::User {
            content: UserContent::Text(text.into()),
        });
        self
    }

    /// Append a user image turn as an inline data URL.
    pub fn with_user_image(mut self, image: &[u8], subtype: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        self.messages.push(ChatMessage::User {
            content: UserContent::ImageUrl(format!("data:image/{subtype};base64,{encoded}")),
        });
        self
    }

    /// Append the assistant turn from a completion.
    pub fn with_assistant(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::Assistant {
            content: content.into(),
        });
        self
    }

    /// Render the history as OpenAI chat-completions message objects.
    ///
    /// Text turns use plain string content; image turns use content-part
    /// arrays with an `image_url` part.
    pub fn to_request_messages(&self) -> Vec<Value> {
        self.messages
            .iter()
            .map(|message| match message {
                ChatMessage::System { content } => {
                    json!({ "role": "system", "content": content })
                }
                ChatMessage::Assistant { content } => {
                    json!({ "role": "assistant", "content": content })
                }
                ChatMessage::User {
                    content: UserContent::Text(text),
                } => json!({ "role": "user", "content": text }),
                ChatMessage::User {
                    content: UserContent::ImageUrl(url),
                } => json!({
                    "role": "user",
                    "content": [{ "type": "image_url", "image_url": { "url": url } }],
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_starts_with_system_preamble() {
        let thread = ChatThread::new("gpt-3.5-turbo", "hello");
        assert_eq!(thread.model, "gpt-3.5-turbo");
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(
            thread.messages[0],
            ChatMessage::System {
                content: "You are a helpful assistant.".into()
            }
        );
        assert_eq!(
            thread.messages[1],
            ChatMessage::User {
                content: UserContent::Text("hello".into())
            }
        );
    }

    #[test]
    fn turns_append_in_order() {
        let thread = ChatThread::new("gpt-4o", "first")
            .with_assistant("reply")
            .with_user_text("second");
        let roles: Vec<&str> = thread
            .messages
            .iter()
            .map(|m| match m {
                ChatMessage::System { .. } => "system",
                ChatMessage::User { .. } => "user",
                ChatMessage::Assistant { .. } => "assistant",
            })
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
    }

    #[test]
    fn image_turn_renders_as_content_parts() {
        let thread = ChatThread::new("gpt-4o", "look").with_user_image(&[1, 2, 3], "png");
        let wire = thread.to_request_messages();
        let last = wire.last().unwrap();
        assert_eq!(last["role"], "user");
        let url = last["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn text_turns_render_as_plain_strings() {
        let wire = ChatThread::new("gpt-3.5-turbo", "hi").to_request_messages();
        assert_eq!(wire[0]["content"], "You are a helpful assistant.");
        assert_eq!(wire[1]["content"], "hi");
    }
}
