//! Anthropic Messages family.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{AnthropicMessagesAdapter, AnthropicMessagesClient};

pub(crate) use stream::chunk_text;
