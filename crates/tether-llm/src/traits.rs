use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tether_types::{ChatMessage, MessageRole};

/// Lazy, finite, single-consumer sequence of answer fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
        }
    }

    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Backend that answers a conversation turn.
///
/// Fragments arrive in order; the stream ends normally on completion and
/// yields an `Err` on failure. No mid-stream recovery is attempted.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: ChatRequest) -> Result<FragmentStream>;
}
