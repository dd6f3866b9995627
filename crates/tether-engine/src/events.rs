use tether_llm::ReplyPlacement;
use tether_types::{ElementDescriptor, QueuedMessage, SessionScope};

/// Everything a view needs to follow one chat
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    WindowOpened {
        session_id: String,
    },
    WindowClosed {
        session_id: String,
        scope: SessionScope,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
        queue_entry_id: String,
    },
    /// One streamed fragment plus the text accumulated so far
    Fragment {
        session_id: String,
        turn_id: String,
        fragment: String,
        text: String,
    },
    TurnCompleted {
        session_id: String,
        turn_id: String,
        message_id: String,
        placement: ReplyPlacement,
    },
    /// The backend produced nothing worth showing
    TurnDropped {
        session_id: String,
        turn_id: String,
    },
    TurnFailed {
        session_id: String,
        turn_id: String,
        error: String,
    },
    QueueChanged {
        session_id: String,
        queued: Vec<QueuedMessage>,
    },
    MessagesChanged {
        session_id: String,
        message_count: usize,
    },
    /// Descriptors of a chat that has messages, for indicator bookkeeping
    AnchorsChanged {
        session_id: String,
        descriptors: Vec<ElementDescriptor>,
    },
    HistoryCleared {
        session_id: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::WindowOpened { session_id }
            | SessionEvent::WindowClosed { session_id, .. }
            | SessionEvent::TurnStarted { session_id, .. }
            | SessionEvent::Fragment { session_id, .. }
            | SessionEvent::TurnCompleted { session_id, .. }
            | SessionEvent::TurnDropped { session_id, .. }
            | SessionEvent::TurnFailed { session_id, .. }
            | SessionEvent::QueueChanged { session_id, .. }
            | SessionEvent::MessagesChanged { session_id, .. }
            | SessionEvent::AnchorsChanged { session_id, .. }
            | SessionEvent::HistoryCleared { session_id } => session_id,
        }
    }
}
