use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::descriptor::ElementDescriptor;
use crate::message::ChatMessage;
use crate::window::WindowState;

/// What the conversation was opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// One or more picked elements
    #[default]
    Element,
    /// A text selection inside the page
    TextSelection,
}

/// Aggregate root of one anchored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub page_url: String,
    pub primary: ElementDescriptor,
    pub descriptors: Vec<ElementDescriptor>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub window: WindowState,
    #[serde(default)]
    pub scope: SessionScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(
        page_url: impl Into<String>,
        descriptors: Vec<ElementDescriptor>,
        window: WindowState,
        scope: SessionScope,
    ) -> Option<Self> {
        let primary = descriptors.first()?.clone();
        let now = Utc::now();
        Some(Self {
            id: format!("chat_{}", uuid::Uuid::new_v4()),
            page_url: page_url.into(),
            primary,
            descriptors,
            messages: Vec::new(),
            window,
            scope,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Append a message unless one with the same id already exists
    pub fn push_message(&mut self, message: ChatMessage) -> bool {
        if self.message(&message.id).is_some() {
            return false;
        }
        self.messages.push(message);
        self.touch();
        true
    }

    /// Unique message ids and at most one assistant message per turn
    pub fn is_consistent(&self) -> bool {
        let mut ids = HashSet::new();
        let mut answered_turns = HashSet::new();
        for message in &self.messages {
            if !ids.insert(message.id.as_str()) {
                return false;
            }
            if let (true, Some(turn)) = (message.is_assistant(), message.turn_id.as_deref()) {
                if !answered_turns.insert(turn) {
                    return false;
                }
            }
        }
        true
    }
}
