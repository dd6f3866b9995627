use std::collections::VecDeque;
use std::time::Duration;
use tether_types::{EngineConfig, ImageAttachment, QueuedMessage};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Nothing was in flight; the entry is now the active request
    Dispatch(QueuedMessage),
    /// Waiting behind the in-flight request
    Queued(QueuedMessage),
    /// Same content and images were submitted moments ago
    Duplicate,
    /// No text and no images
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextDispatch {
    /// Dequeued and now in flight
    Ready(QueuedMessage),
    /// Spacing between dequeues has not elapsed yet
    Wait(Duration),
    /// A request is still in flight
    Busy,
    Idle,
}

/// FIFO of user submissions with a single in-flight slot.
///
/// Time is passed in by the caller so the queue itself stays synchronous.
#[derive(Debug)]
pub struct DispatchQueue {
    entries: VecDeque<QueuedMessage>,
    in_flight: Option<QueuedMessage>,
    recent: Vec<(String, Instant)>,
    last_dequeue: Option<Instant>,
    duplicate_window: Duration,
    spacing: Duration,
}

impl DispatchQueue {
    pub fn new(duplicate_window: Duration, spacing: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            in_flight: None,
            recent: Vec::new(),
            last_dequeue: None,
            duplicate_window,
            spacing,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.duplicate_window(), config.dequeue_spacing())
    }

    pub fn submit(&mut self, content: &str, images: Vec<ImageAttachment>, now: Instant) -> SubmitOutcome {
        if content.trim().is_empty() && images.is_empty() {
            return SubmitOutcome::Empty;
        }

        let window = self.duplicate_window;
        self.recent.retain(|(_, at)| now.saturating_duration_since(*at) < window);
        let signature = QueuedMessage::signature(content, &images);
        // A suppressed repeat keeps the window open from its own timestamp
        if let Some((_, at)) = self.recent.iter_mut().find(|(s, _)| *s == signature) {
            *at = now;
            return SubmitOutcome::Duplicate;
        }
        self.recent.push((signature, now));

        let entry = QueuedMessage::new(content, images);
        if self.in_flight.is_none() && self.entries.is_empty() {
            self.in_flight = Some(entry.clone());
            SubmitOutcome::Dispatch(entry)
        } else {
            self.entries.push_back(entry.clone());
            SubmitOutcome::Queued(entry)
        }
    }

    /// Release the in-flight slot, whether the turn succeeded or failed
    pub fn complete(&mut self) -> Option<QueuedMessage> {
        self.in_flight.take()
    }

    pub fn next_ready(&mut self, now: Instant) -> NextDispatch {
        if self.in_flight.is_some() {
            return NextDispatch::Busy;
        }
        if self.entries.is_empty() {
            return NextDispatch::Idle;
        }
        if let Some(last) = self.last_dequeue {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.spacing {
                return NextDispatch::Wait(self.spacing - elapsed);
            }
        }
        match self.entries.pop_front() {
            Some(entry) => {
                self.last_dequeue = Some(now);
                self.in_flight = Some(entry.clone());
                NextDispatch::Ready(entry)
            }
            None => NextDispatch::Idle,
        }
    }

    /// Drop a waiting entry; the in-flight request cannot be removed
    pub fn remove(&mut self, entry_id: &str) -> Option<QueuedMessage> {
        let index = self.entries.iter().position(|e| e.id == entry_id)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Option<&QueuedMessage> {
        self.in_flight.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
