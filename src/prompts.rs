//! Static user-facing texts: help, pricing, and reply literals.

/// System preamble opening every new conversation thread.
pub const SYSTEM_PREAMBLE: &str = "You are a helpful assistant.";

/// Shown whenever command parsing fails.
pub const HELP_MESSAGE: &str = "\
Usage: open a thread with the following commands and reply in thread for further chatting (except !image).
Messages started with `//` will be ignored.
* `!chat <text>` - use gpt-3.5-turbo
* `!chat o <text>` - use gpt-4o
* `!chat 4 <text>` - use gpt-4-turbo
* `!image <text>` - use dall-e-3 to generate an image";

/// Reply to `!pricing`.
pub const PRICING_MESSAGE: &str = "\
```
    Pricing per 1M tokens:
    Name          | Input | Output
    ------------------------------
    gpt-4o        | $5.00  | $15.00
    gpt-4-turbo   | $10.00 | $30.00
    gpt-3.5-turbo | $0.5   | $1.50
    ------------------------------
    Pricing per image:
    dall-e-3 $0.040
    dall-e-2 $0.020
```";

/// Generic reply when event handling fails unexpectedly.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error";

/// Placeholder when the completion API returns no content.
pub const EMPTY_RESPONSE_MESSAGE: &str = "Empty response";

/// Notice when an image lands in a thread whose model cannot see it.
pub const IMAGE_CAPABILITY_MESSAGE: &str = "Only gpt-4o supports images";
