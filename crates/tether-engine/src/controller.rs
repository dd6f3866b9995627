//! One anchored chat: its window, anchors, dispatch queue and turn loop.
//!
//! All state sits behind a single mutex that is never held across an await.
//! Turns run on a spawned task that drains the queue; page-dependent operations
//! take the page by reference and run synchronously on the caller's thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use tether_dom::{DescriptorResolver, PageSurface};
use tether_llm::{apply_reply, consume, ChatBackend, ChatRequest, StreamAggregator};
use tether_persist::{PersistDebouncer, PersistenceClient};
use tether_types::{
    AnchorKey, ChatMessage, ChatSession, CollapseState, ElementDescriptor, EngineConfig, ImageAttachment, Point,
    QueuedMessage, SessionScope, Size, WindowState,
};

use crate::anchor::{AnchorRegistry, AnchorTick};
use crate::dispatch::{DispatchQueue, NextDispatch, SubmitOutcome};
use crate::error::EngineError;
use crate::events::SessionEvent;
use crate::prompt::build_system_prompt;
use crate::window::WindowStateMachine;

const EVENT_CAPACITY: usize = 256;

struct ControllerState {
    /// Created on the first dispatched turn
    session: Option<ChatSession>,
    window: WindowState,
    anchors: AnchorRegistry,
    queue: DispatchQueue,
    scope: SessionScope,
    open: bool,
    /// Bumped by `clear_history` so answers for older turns are discarded
    generation: u64,
}

impl ControllerState {
    fn snapshot(&self) -> Option<ChatSession> {
        let mut session = self.session.clone()?;
        session.window = self.window.clone();
        session.descriptors = self.anchors.descriptors().to_vec();
        if let Some(primary) = session.descriptors.first() {
            session.primary = primary.clone();
        }
        Some(session)
    }

    fn message_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.messages.len())
    }
}

struct Inner {
    id: String,
    page_url: String,
    config: EngineConfig,
    backend: Arc<dyn ChatBackend>,
    persistence: Arc<dyn PersistenceClient>,
    debouncer: PersistDebouncer,
    resolver: DescriptorResolver,
    machine: WindowStateMachine,
    events: broadcast::Sender<SessionEvent>,
    idle: watch::Sender<bool>,
    state: Mutex<ControllerState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn persist(&self, state: &ControllerState) {
        if let Some(snapshot) = state.snapshot() {
            self.debouncer.schedule(snapshot);
        }
    }

    fn queue_changed(&self, queued: Vec<QueuedMessage>) {
        self.emit(SessionEvent::QueueChanged {
            session_id: self.id.clone(),
            queued,
        });
    }

    fn anchors_changed(&self, state: &ControllerState) {
        if state.message_count() > 0 {
            self.emit(SessionEvent::AnchorsChanged {
                session_id: self.id.clone(),
                descriptors: state.anchors.descriptors().to_vec(),
            });
        }
    }
}

/// Builder for a fresh or restored [`ChatController`]
pub struct ChatControllerBuilder {
    page_url: Option<String>,
    descriptors: Vec<ElementDescriptor>,
    scope: SessionScope,
    position: Point,
    backend: Option<Arc<dyn ChatBackend>>,
    persistence: Option<Arc<dyn PersistenceClient>>,
    config: EngineConfig,
    restored: Option<ChatSession>,
}

impl ChatControllerBuilder {
    pub fn new() -> Self {
        Self {
            page_url: None,
            descriptors: Vec::new(),
            scope: SessionScope::Element,
            position: Point::default(),
            backend: None,
            persistence: None,
            config: EngineConfig::default(),
            restored: None,
        }
    }

    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn descriptor(mut self, descriptor: ElementDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptors(mut self, descriptors: Vec<ElementDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn scope(mut self, scope: SessionScope) -> Self {
        self.scope = scope;
        self
    }

    /// Where the window first appears
    pub fn position(mut self, position: Point) -> Self {
        self.position = position;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn persistence(mut self, client: Arc<dyn PersistenceClient>) -> Self {
        self.persistence = Some(client);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Continue a stored session; its page, anchors, window and scope win
    pub fn restore(mut self, session: ChatSession) -> Self {
        self.restored = Some(session);
        self
    }

    pub fn build(self) -> Result<ChatController, EngineError> {
        let backend = self.backend.ok_or(EngineError::Missing("chat backend"))?;
        let persistence = self.persistence.ok_or(EngineError::Missing("persistence client"))?;
        let config = self.config;

        let (id, page_url, descriptors, window, scope, session) = match self.restored {
            Some(session) => (
                session.id.clone(),
                session.page_url.clone(),
                session.descriptors.clone(),
                session.window.clone(),
                session.scope,
                Some(session),
            ),
            None => (
                format!("chat_{}", uuid::Uuid::new_v4()),
                self.page_url.ok_or(EngineError::Missing("page url"))?,
                self.descriptors,
                WindowState::new(self.position, config.default_window_size),
                self.scope,
                None,
            ),
        };
        let anchors = AnchorRegistry::new(descriptors, &config)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle, _) = watch::channel(true);
        let debouncer = PersistDebouncer::new(Arc::clone(&persistence), config.persist_debounce());

        Ok(ChatController {
            inner: Arc::new(Inner {
                id,
                page_url,
                resolver: DescriptorResolver::from_config(&config),
                machine: WindowStateMachine::from_config(&config),
                state: Mutex::new(ControllerState {
                    session,
                    window,
                    anchors,
                    queue: DispatchQueue::from_config(&config),
                    scope,
                    open: false,
                    generation: 0,
                }),
                config,
                backend,
                persistence,
                debouncer,
                events,
                idle,
            }),
        })
    }
}

impl Default for ChatControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one anchored chat; cheap to clone
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn builder() -> ChatControllerBuilder {
        ChatControllerBuilder::new()
    }

    /// Rebuild a controller around a session loaded from persistence
    pub fn restore(
        session: ChatSession,
        backend: Arc<dyn ChatBackend>,
        persistence: Arc<dyn PersistenceClient>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        Self::builder()
            .restore(session)
            .backend(backend)
            .persistence(persistence)
            .config(config)
            .build()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn page_url(&self) -> &str {
        &self.inner.page_url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.subscribe())
    }

    // ---- window lifecycle ----

    pub fn open(&self) {
        self.inner.state().open = true;
        tracing::info!(session_id = %self.inner.id, "CHAT: window opened");
        self.inner.emit(SessionEvent::WindowOpened {
            session_id: self.inner.id.clone(),
        });
    }

    /// Close the window after flushing any pending write.
    ///
    /// Returns whether a snapshot was written by the flush.
    pub async fn close(&self) -> bool {
        let scope = {
            let mut state = self.inner.state();
            state.open = false;
            self.inner.persist(&state);
            state.scope
        };
        let flushed = self.inner.debouncer.flush().await;
        tracing::info!(session_id = %self.inner.id, flushed, "CHAT: window closed");
        self.inner.emit(SessionEvent::WindowClosed {
            session_id: self.inner.id.clone(),
            scope,
        });
        flushed
    }

    pub fn is_open(&self) -> bool {
        self.inner.state().open
    }

    /// Write the current snapshot now instead of waiting for the debounce
    pub async fn flush(&self) -> bool {
        {
            let state = self.inner.state();
            self.inner.persist(&state);
        }
        self.inner.debouncer.flush().await
    }

    // ---- dispatch ----

    /// Send a message now, or queue it behind the in-flight turn.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, content: &str, images: Vec<ImageAttachment>) -> SubmitOutcome {
        let (outcome, queued) = {
            let mut state = self.inner.state();
            let outcome = state.queue.submit(content, images, Instant::now());
            if matches!(outcome, SubmitOutcome::Dispatch(_)) {
                self.inner.idle.send_replace(false);
            }
            (outcome, state.queue.snapshot())
        };

        match &outcome {
            SubmitOutcome::Dispatch(entry) => {
                tokio::spawn(drive_turns(Arc::clone(&self.inner), entry.clone()));
            }
            SubmitOutcome::Queued(entry) => {
                tracing::debug!(session_id = %self.inner.id, entry_id = %entry.id, queue_len = queued.len(), "CHAT: message queued");
                self.inner.queue_changed(queued);
            }
            SubmitOutcome::Duplicate => {
                tracing::debug!(session_id = %self.inner.id, "CHAT: duplicate submission dropped");
            }
            SubmitOutcome::Empty => {}
        }
        outcome
    }

    pub fn remove_queued(&self, entry_id: &str) -> bool {
        let (removed, queued) = {
            let mut state = self.inner.state();
            (state.queue.remove(entry_id).is_some(), state.queue.snapshot())
        };
        if removed {
            self.inner.queue_changed(queued);
        }
        removed
    }

    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.state().queue.clear();
        if dropped > 0 {
            self.inner.queue_changed(Vec::new());
        }
        dropped
    }

    pub fn queued(&self) -> Vec<QueuedMessage> {
        self.inner.state().queue.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state().queue.is_busy()
    }

    /// Resolves once no turn is in flight and the queue is drained
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Forget the conversation: queue, messages, stored session and markers
    pub async fn clear_history(&self) {
        let had_session = {
            let mut state = self.inner.state();
            state.generation += 1;
            state.queue.clear();
            state.session.take().is_some()
        };
        self.inner.debouncer.cancel().await;

        if had_session {
            if let Err(e) = self.inner.persistence.clear(&self.inner.id).await {
                tracing::warn!(session_id = %self.inner.id, error = %e, "CHAT: failed to clear stored session");
            }
        }
        tracing::info!(session_id = %self.inner.id, "CHAT: history cleared");
        self.inner.queue_changed(Vec::new());
        self.inner.emit(SessionEvent::HistoryCleared {
            session_id: self.inner.id.clone(),
        });
    }

    // ---- window state ----

    fn mutate<R>(&self, f: impl FnOnce(&Inner, &mut ControllerState) -> (R, bool)) -> R {
        let inner: &Inner = &self.inner;
        let mut state = inner.state();
        let (result, changed) = f(inner, &mut *state);
        if changed {
            inner.persist(&state);
        }
        result
    }

    pub fn toggle_rectangle(&self) -> CollapseState {
        self.mutate(|inner, s| (inner.machine.toggle_rectangle(&mut s.window), true))
    }

    pub fn toggle_square(&self) -> CollapseState {
        self.mutate(|inner, s| (inner.machine.toggle_square(&mut s.window), true))
    }

    pub fn expand(&self) -> bool {
        self.mutate(|inner, s| {
            let changed = inner.machine.expand(&mut s.window);
            (changed, changed)
        })
    }

    pub fn move_to(&self, position: Point) -> bool {
        self.mutate(|inner, s| {
            let changed = inner.machine.move_to(&mut s.window, position);
            (changed, changed)
        })
    }

    pub fn begin_drag(&self) {
        self.inner.state().anchors.begin_drag();
    }

    /// Finish a drag and remember the new offset from the active anchor
    pub fn end_drag<P: PageSurface>(&self, page: &P) -> Option<Point> {
        self.mutate(|inner, s| {
            let offset = s.anchors.end_drag(page, &inner.resolver, &mut s.window);
            (offset, true)
        })
    }

    /// Resize the expanded window and re-capture the active anchor's offset
    pub fn resize<P: PageSurface>(&self, page: &P, size: Size) -> bool {
        self.mutate(|inner, s| {
            let changed = inner.machine.resize(&mut s.window, size);
            if changed {
                s.anchors.capture_offset(page, &inner.resolver, &mut s.window);
            }
            (changed, changed)
        })
    }

    pub fn set_queue_expanded(&self, expanded: bool) -> bool {
        self.mutate(|inner, s| {
            let changed = inner.machine.set_queue_expanded(&mut s.window, expanded);
            (changed, changed)
        })
    }

    pub fn set_replace_last_reply(&self, enabled: bool) -> bool {
        self.mutate(|inner, s| {
            let changed = inner.machine.set_replace_last_reply(&mut s.window, enabled);
            (changed, changed)
        })
    }

    pub fn window(&self) -> WindowState {
        self.inner.state().window.clone()
    }

    pub fn displayed_size(&self) -> Size {
        let state = self.inner.state();
        self.inner.machine.displayed_size(&state.window)
    }

    // ---- anchors ----

    /// One "ensure anchor position" pass against the current page
    pub fn refresh_anchor<P: PageSurface>(&self, page: &P) -> AnchorTick {
        self.mutate(|inner, s| {
            let tick = s.anchors.ensure_anchor_position(page, &inner.resolver, &mut s.window);
            let changed = tick.changed_state();
            (tick, changed)
        })
    }

    pub fn activate_anchor<P: PageSurface>(&self, page: &P, key: &AnchorKey) -> Result<Option<Point>, EngineError> {
        self.mutate(|inner, s| {
            let result = s.anchors.activate_anchor(page, &inner.resolver, &mut s.window, key);
            let changed = result.is_ok();
            (result, changed)
        })
    }

    pub fn attach(&self, descriptor: ElementDescriptor) -> bool {
        self.mutate(|inner, s| {
            let attached = s.anchors.attach(descriptor);
            if attached {
                inner.anchors_changed(s);
            }
            (attached, attached)
        })
    }

    pub fn detach(&self, key: &AnchorKey) -> Result<ElementDescriptor, EngineError> {
        self.mutate(|inner, s| {
            let result = s.anchors.detach(key, &mut s.window);
            let changed = result.is_ok();
            if changed {
                inner.anchors_changed(s);
            }
            (result, changed)
        })
    }

    pub fn anchor_keys(&self) -> Vec<AnchorKey> {
        self.inner.state().anchors.keys()
    }

    pub fn descriptors(&self) -> Vec<ElementDescriptor> {
        self.inner.state().anchors.descriptors().to_vec()
    }

    pub fn anchor_missing(&self) -> bool {
        self.inner.state().anchors.is_missing()
    }

    // ---- session ----

    /// Current session snapshot, `None` until the first turn is dispatched
    pub fn session(&self) -> Option<ChatSession> {
        self.inner.state().snapshot()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .state()
            .session
            .as_ref()
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn scope(&self) -> SessionScope {
        self.inner.state().scope
    }
}

async fn drive_turns(inner: Arc<Inner>, first: QueuedMessage) {
    let mut entry = first;
    loop {
        run_turn(&inner, entry).await;
        inner.state().queue.complete();

        entry = loop {
            let next = {
                let mut state = inner.state();
                let next = state.queue.next_ready(Instant::now());
                match &next {
                    NextDispatch::Ready(_) => inner.queue_changed(state.queue.snapshot()),
                    NextDispatch::Idle => {
                        inner.idle.send_replace(true);
                    }
                    NextDispatch::Wait(_) | NextDispatch::Busy => {}
                }
                next
            };
            match next {
                NextDispatch::Ready(next) => break next,
                NextDispatch::Wait(delay) => tokio::time::sleep(delay).await,
                // Another driver owns the in-flight slot, or nothing is left
                NextDispatch::Busy | NextDispatch::Idle => return,
            }
        };
    }
}

async fn run_turn(inner: &Inner, entry: QueuedMessage) {
    let turn_id = uuid::Uuid::new_v4().to_string();

    let prepared = {
        let mut guard = inner.state();
        let state = &mut *guard;
        let generation = state.generation;

        let created = state.session.is_none();
        if created {
            state.session = ChatSession::new(
                inner.page_url.clone(),
                state.anchors.descriptors().to_vec(),
                state.window.clone(),
                state.scope,
            )
            .map(|mut session| {
                session.id = inner.id.clone();
                session
            });
        }

        let system_prompt =
            build_system_prompt(&inner.config.system_preamble, &inner.page_url, state.anchors.descriptors());
        match state.session.as_mut() {
            Some(session) => {
                session.push_message(ChatMessage::user(
                    entry.content.clone(),
                    entry.images.clone(),
                    turn_id.clone(),
                ));
                let request = ChatRequest::new(system_prompt, session.messages.clone());
                let message_count = session.messages.len();
                inner.persist(state);
                if created {
                    inner.anchors_changed(state);
                }
                Some((generation, request, message_count, state.queue.len()))
            }
            None => None,
        }
    };

    let Some((generation, request, message_count, queue_len)) = prepared else {
        tracing::error!(session_id = %inner.id, "CHAT: chat has no anchors, cannot start a session");
        return;
    };

    tracing::info!(session_id = %inner.id, turn_id = %turn_id, queue_len, "CHAT: turn started");
    inner.emit(SessionEvent::TurnStarted {
        session_id: inner.id.clone(),
        turn_id: turn_id.clone(),
        queue_entry_id: entry.id.clone(),
    });
    inner.emit(SessionEvent::MessagesChanged {
        session_id: inner.id.clone(),
        message_count,
    });

    match stream_answer(inner, &turn_id, request).await {
        Ok(aggregator) => {
            let fragments = aggregator.fragment_count();
            match aggregator.finish() {
                Some(answer) => {
                    let applied = record(inner, generation, |state| {
                        let replace_last = state.window.replace_last_reply;
                        let session = state.session.as_mut()?;
                        Some(apply_reply(&mut session.messages, &turn_id, answer, replace_last))
                    });
                    match applied {
                        Some((applied, message_count)) => {
                            tracing::info!(
                                session_id = %inner.id,
                                turn_id = %turn_id,
                                fragments,
                                placement = ?applied.placement,
                                "CHAT: turn completed"
                            );
                            inner.emit(SessionEvent::TurnCompleted {
                                session_id: inner.id.clone(),
                                turn_id,
                                message_id: applied.message_id,
                                placement: applied.placement,
                            });
                            inner.emit(SessionEvent::MessagesChanged {
                                session_id: inner.id.clone(),
                                message_count,
                            });
                        }
                        None => {
                            tracing::debug!(session_id = %inner.id, turn_id = %turn_id, "CHAT: history cleared mid-turn, answer discarded");
                        }
                    }
                }
                None => {
                    tracing::info!(session_id = %inner.id, turn_id = %turn_id, "CHAT: empty answer, turn dropped");
                    inner.emit(SessionEvent::TurnDropped {
                        session_id: inner.id.clone(),
                        turn_id,
                    });
                }
            }
        }
        Err(e) => {
            tracing::warn!(session_id = %inner.id, turn_id = %turn_id, error = %e, "CHAT: turn failed");
            let recorded = record(inner, generation, |state| {
                let session = state.session.as_mut()?;
                session.push_message(ChatMessage::error(format!("Error: {e}")));
                Some(())
            });
            let Some(((), message_count)) = recorded else {
                tracing::debug!(session_id = %inner.id, turn_id = %turn_id, "CHAT: history cleared mid-turn, failure discarded");
                return;
            };
            inner.emit(SessionEvent::TurnFailed {
                session_id: inner.id.clone(),
                turn_id,
                error: e.to_string(),
            });
            inner.emit(SessionEvent::MessagesChanged {
                session_id: inner.id.clone(),
                message_count,
            });
        }
    }
}

async fn stream_answer(inner: &Inner, turn_id: &str, request: ChatRequest) -> anyhow::Result<StreamAggregator> {
    let stream = inner.backend.send(request).await?;
    consume(stream, |fragment, text| {
        inner.emit(SessionEvent::Fragment {
            session_id: inner.id.clone(),
            turn_id: turn_id.to_string(),
            fragment: fragment.to_string(),
            text: text.to_string(),
        });
    })
    .await
}

/// Apply a turn result unless history was cleared since the turn started.
///
/// Returns the closure's value and the resulting message count.
fn record<T>(
    inner: &Inner,
    generation: u64,
    apply: impl FnOnce(&mut ControllerState) -> Option<T>,
) -> Option<(T, usize)> {
    let mut state = inner.state();
    if state.generation != generation {
        return None;
    }
    let value = apply(&mut *state)?;
    if let Some(session) = state.session.as_mut() {
        session.touch();
    }
    inner.persist(&state);
    Some((value, state.message_count()))
}
