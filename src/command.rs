//! Bang-command recognition and parsing.

use crate::error::CommandError;
use crate::llm::models;

const KNOWN_COMMANDS: [&str; 3] = ["chat", "image", "pricing"];

/// Image output size, fixed for every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const SQUARE_1024: ImageSize = ImageSize {
        width: 1024,
        height: 1024,
    };
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A parsed bang command. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat {
        model: String,
        prompt: String,
    },
    Image {
        model: String,
        prompt: String,
        size: ImageSize,
    },
    Pricing,
}

/// Whether the input looks like a command at all.
///
/// Matches known verbs by prefix, so `!chatter` passes here and is rejected
/// by [`parse`] as an unknown verb. Kept bug-compatible with the behavior
/// users already rely on: both paths end in a help reply.
pub fn is_command(input: &str) -> bool {
    let raw = input.trim();
    raw.strip_prefix('!')
        .is_some_and(|rest| KNOWN_COMMANDS.iter().any(|c| rest.starts_with(c)))
}

/// Parse a message body into a [`Command`].
pub fn parse(input: &str) -> Result<Command, CommandError> {
    let raw = input.trim();
    let Some(rest) = raw.strip_prefix('!') else {
        return Err(CommandError::NotACommand(input.to_owned()));
    };

    let verb: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    let tail = rest[verb.len()..].strip_prefix(' ').unwrap_or(&rest[verb.len()..]);

    match verb.as_str() {
        "chat" => {
            if tail.is_empty() {
                return Err(CommandError::EmptyPrompt);
            }
            let (model, prompt) = match split_selector(tail) {
                Some(('o', prompt)) => (models::CHAT_GPT_4O, prompt),
                Some(('4', prompt)) => (models::CHAT_GPT_4_TURBO, prompt),
                _ => (models::CHAT_DEFAULT, tail),
            };
            Ok(Command::Chat {
                model: model.to_owned(),
                prompt: prompt.to_owned(),
            })
        }
        "image" => {
            if tail.is_empty() {
                return Err(CommandError::EmptyPrompt);
            }
            let (model, prompt) = match split_selector(tail) {
                Some(('3', prompt)) => (models::IMAGE_DALL_E_3, prompt),
                _ => (models::IMAGE_DEFAULT, tail),
            };
            Ok(Command::Image {
                model: model.to_owned(),
                prompt: prompt.to_owned(),
                size: ImageSize::SQUARE_1024,
            })
        }
        "pricing" => Ok(Command::Pricing),
        _ => Err(CommandError::UnknownCommand(verb)),
    }
}

/// Split a leading one-character model selector followed by a space.
///
/// Returns None when the tail is shorter than two characters, so a
/// single-character prompt falls through to the default model instead of
/// indexing out of bounds. The remainder is taken from the iterator so a
/// multi-byte first character can never split mid-boundary.
fn split_selector(tail: &str) -> Option<(char, &str)> {
    let mut chars = tail.chars();
    let selector = chars.next()?;
    if chars.next()? != ' ' {
        return None;
    }
    Some((selector, chars.as_str()))
}
