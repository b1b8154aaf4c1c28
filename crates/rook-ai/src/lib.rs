//! Assistant conversation client surface for Rook.
//!
//! The workflow owns conversation accumulation; clients here are stateless
//! request/response adapters that report token usage and cost per call.
mod openrouter;
mod retry;
mod types;

pub use openrouter::{OpenRouterClient, OpenRouterConfig, DEFAULT_OPENROUTER_MODEL};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, RookAiError,
};
