use chrono::Utc;
use tether_types::ChatMessage;

use crate::streaming::PartitionedAnswer;

/// Where a finished answer ended up in the message list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPlacement {
    /// An answer for the same turn existed and was regenerated in place
    UpdatedTurn,
    /// The "replace last reply" preference overwrote the latest answer
    ReplacedLast,
    /// The previous message already carried this exact text
    MergedDuplicate,
    Appended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedReply {
    pub message_id: String,
    pub placement: ReplyPlacement,
}

/// Store a finished answer for `turn_id` without breaking the one-answer-per-turn rule
pub fn apply_reply(
    messages: &mut Vec<ChatMessage>,
    turn_id: &str,
    reply: PartitionedAnswer,
    replace_last: bool,
) -> AppliedReply {
    if let Some(existing) = messages.iter_mut().find(|m| m.answers_turn(turn_id)) {
        overwrite(existing, reply);
        return AppliedReply {
            message_id: existing.id.clone(),
            placement: ReplyPlacement::UpdatedTurn,
        };
    }

    if replace_last {
        if let Some(last) = messages.iter_mut().rev().find(|m| m.is_assistant() && !m.is_error) {
            overwrite(last, reply);
            last.turn_id = Some(turn_id.to_string());
            return AppliedReply {
                message_id: last.id.clone(),
                placement: ReplyPlacement::ReplacedLast,
            };
        }
    }

    // A duplicate completion event can race the first one
    if let Some(previous) = messages.last_mut() {
        if previous.is_assistant() && !previous.is_error && previous.content == reply.answer {
            overwrite(previous, reply);
            if previous.turn_id.is_none() {
                previous.turn_id = Some(turn_id.to_string());
            }
            return AppliedReply {
                message_id: previous.id.clone(),
                placement: ReplyPlacement::MergedDuplicate,
            };
        }
    }

    let message = ChatMessage::assistant(reply.answer, reply.thinking, Some(turn_id.to_string()));
    let message_id = message.id.clone();
    messages.push(message);
    AppliedReply {
        message_id,
        placement: ReplyPlacement::Appended,
    }
}

fn overwrite(message: &mut ChatMessage, reply: PartitionedAnswer) {
    message.content = reply.answer;
    message.thinking = reply.thinking;
    message.is_error = false;
    message.timestamp = Utc::now();
}
