use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Image attached to a user turn, usually a data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ImageAttachment {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Correlates a user message with the assistant message answering it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    /// Reasoning preamble kept apart from the visible answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Synthetic assistant message reporting a failed turn
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, images: Vec<ImageAttachment>, turn_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            turn_id: Some(turn_id.into()),
            images,
            thinking: None,
            timestamp: Utc::now(),
            is_error: false,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        thinking: Option<String>,
        turn_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: content.into(),
            turn_id,
            images: Vec::new(),
            thinking,
            timestamp: Utc::now(),
            is_error: false,
        }
    }

    /// Error surfaced to the user in place of an answer.
    ///
    /// Carries no turn id so a later successful regeneration of the same turn
    /// still owns the single assistant slot for that turn.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content, None, None)
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn answers_turn(&self, turn_id: &str) -> bool {
        self.is_assistant() && self.turn_id.as_deref() == Some(turn_id)
    }
}

/// User submission waiting for the in-flight request to finish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Queue entry id, distinct from the id the message gets once sent
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    pub created_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(content: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            id: format!("q_{}", uuid::Uuid::new_v4()),
            content: content.into(),
            images,
            created_at: Utc::now(),
        }
    }

    /// Content plus image sources, used to spot accidental double submissions
    pub fn signature(content: &str, images: &[ImageAttachment]) -> String {
        let mut signature = content.trim().to_string();
        for image in images {
            signature.push('\u{1f}');
            signature.push_str(&image.source);
        }
        signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_has_no_turn() {
        let msg = ChatMessage::error("Backend unavailable");

        assert!(msg.is_assistant());
        assert!(msg.is_error);
        assert!(msg.turn_id.is_none());
    }

    #[test]
    fn test_signature_distinguishes_images() {
        let plain = QueuedMessage::signature("hello", &[]);
        let with_image = QueuedMessage::signature("hello", &[ImageAttachment::new("data:image/png;base64,AA")]);

        assert_ne!(plain, with_image);
        assert_eq!(plain, QueuedMessage::signature("  hello ", &[]));
    }

    #[test]
    fn test_message_role_serialization() {
        let msg = ChatMessage::assistant("Hi", Some("plan".to_string()), Some("t1".to_string()));
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["turnId"], "t1");
        assert_eq!(json["thinking"], "plan");
        assert!(json.get("images").is_none());
    }
}
