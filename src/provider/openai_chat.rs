//! OpenAI Chat Completions family, shared by OpenAI and OpenRouter.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{IMAGE_MODEL, ImageResult, OpenAiChatAdapter, OpenAiChatClient};

pub(crate) use stream::chunk_text;
