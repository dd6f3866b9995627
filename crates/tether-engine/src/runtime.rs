use std::collections::{BTreeMap, BTreeSet};
use tether_dom::{DescriptorResolver, PageSurface};
use tether_types::EngineConfig;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::anchor::AnchorTick;
use crate::controller::ChatController;
use crate::events::SessionEvent;
use crate::frame::{FrameScheduler, FrameTrigger};
use crate::indicator::{IndicatorSynchronizer, RepositionSummary};

/// What one animation frame did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub triggers: BTreeSet<FrameTrigger>,
    pub coalesced: usize,
    pub anchors_refreshed: usize,
    pub anchors_missing: usize,
    pub indicators: RepositionSummary,
}

struct Registered {
    controller: ChatController,
    events: broadcast::Receiver<SessionEvent>,
}

/// Page-wide scheduling shared by every chat on one page.
///
/// Scroll, resize and mutation notifications coalesce into a single pending
/// frame. Running the frame re-anchors every open chat window and repositions
/// all indicators. Chats may be registered or dropped between frames.
pub struct PageRuntime<E> {
    sessions: BTreeMap<String, Registered>,
    indicators: IndicatorSynchronizer<E>,
    frames: FrameScheduler,
    resolver: DescriptorResolver,
}

impl<E: Clone + PartialEq> PageRuntime<E> {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sessions: BTreeMap::new(),
            indicators: IndicatorSynchronizer::new(),
            frames: FrameScheduler::new(),
            resolver: DescriptorResolver::from_config(config),
        }
    }

    pub fn register(&mut self, controller: ChatController) {
        let events = controller.subscribe();
        resync(&mut self.indicators, &controller);
        tracing::debug!(session_id = %controller.id(), "RUNTIME: chat registered");
        self.sessions
            .insert(controller.id().to_string(), Registered { controller, events });
        self.frames.request(FrameTrigger::Mutation);
    }

    pub fn unregister(&mut self, session_id: &str) -> Option<ChatController> {
        let registered = self.sessions.remove(session_id)?;
        self.indicators.remove_session(session_id);
        Some(registered.controller)
    }

    pub fn controller(&self, session_id: &str) -> Option<&ChatController> {
        self.sessions.get(session_id).map(|r| &r.controller)
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// Record a page notification; returns true when it scheduled a new frame
    pub fn notify(&mut self, trigger: FrameTrigger) -> bool {
        self.frames.request(trigger)
    }

    pub fn frame_pending(&self) -> bool {
        self.frames.is_pending()
    }

    /// Apply session events received since the last call to the indicators.
    ///
    /// Returns how many of them changed markers; any such change schedules a frame.
    pub fn sync_events(&mut self) -> usize {
        let mut applied = 0;
        for registered in self.sessions.values_mut() {
            loop {
                match registered.events.try_recv() {
                    Ok(event) => {
                        if self.indicators.on_session_event(&event) {
                            applied += 1;
                        }
                    }
                    Err(TryRecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %registered.controller.id(), skipped, "RUNTIME: event backlog overflowed, resyncing indicators");
                        resync(&mut self.indicators, &registered.controller);
                        applied += 1;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        if applied > 0 {
            self.frames.request(FrameTrigger::Mutation);
        }
        applied
    }

    /// Run the pending frame against the current page.
    ///
    /// Chat events that touched indicators count as a pending frame, so markers
    /// follow window and history changes on an otherwise quiet page.
    pub fn on_animation_frame<P>(&mut self, page: &P) -> Option<FrameReport>
    where
        P: PageSurface<Element = E>,
    {
        self.sync_events();
        let frame = self.frames.take()?;

        let mut anchors_refreshed = 0;
        let mut anchors_missing = 0;
        for registered in self.sessions.values() {
            if !registered.controller.is_open() {
                continue;
            }
            match registered.controller.refresh_anchor(page) {
                AnchorTick::Missing => anchors_missing += 1,
                AnchorTick::Anchored { .. } => anchors_refreshed += 1,
            }
        }

        let indicators = self.indicators.reposition(page, &self.resolver);
        tracing::debug!(
            coalesced = frame.coalesced,
            anchors_refreshed,
            anchors_missing,
            visible = indicators.visible,
            "RUNTIME: frame done"
        );

        Some(FrameReport {
            triggers: frame.triggers,
            coalesced: frame.coalesced,
            anchors_refreshed,
            anchors_missing,
            indicators,
        })
    }

    pub fn indicators(&self) -> &IndicatorSynchronizer<E> {
        &self.indicators
    }

    pub fn frames_run(&self) -> u64 {
        self.frames.frames_run()
    }
}

/// Rebuild a chat's markers from its current state
fn resync<E: Clone + PartialEq>(indicators: &mut IndicatorSynchronizer<E>, controller: &ChatController) {
    match controller.session() {
        Some(session) if !session.messages.is_empty() => {
            indicators.sync_session(&session.id, &session.descriptors);
        }
        _ => {
            indicators.remove_session(controller.id());
        }
    }
    indicators.set_session_hidden(controller.id(), controller.is_open());
}
