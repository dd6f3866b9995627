use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use tether_dom::{InMemoryPage, NodeSpec};
use tether_engine::{ChatController, SessionEvent, SubmitOutcome};
use tether_llm::{ReplyPlacement, Script, ScriptedBackend};
use tether_persist::{InMemoryPersistenceClient, PersistenceClient};
use tether_types::{CollapseState, ElementDescriptor, EngineConfig, Point, Rect, SessionScope, Size};
use tokio::sync::broadcast;

fn card() -> ElementDescriptor {
    ElementDescriptor::new("el-card", "div")
        .with_id("card")
        .with_text_preview("Pro plan: 12 EUR / month")
}

fn page() -> InMemoryPage {
    let mut page = InMemoryPage::new();
    page.insert(NodeSpec::new("div").id("card").rect(Rect::new(100.0, 50.0, 200.0, 40.0)));
    page
}

fn controller(backend: &Arc<ScriptedBackend>, store: &Arc<InMemoryPersistenceClient>) -> ChatController {
    ChatController::builder()
        .page_url("https://shop.test/pricing")
        .descriptor(card())
        .position(Point::new(70.0, 160.0))
        .backend(backend.clone())
        .persistence(store.clone())
        .build()
        .unwrap()
}

fn setup() -> (Arc<ScriptedBackend>, Arc<InMemoryPersistenceClient>) {
    (Arc::new(ScriptedBackend::new()), Arc::new(InMemoryPersistenceClient::new()))
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_queued_turns_run_in_order_one_at_a_time() {
    let backend = Arc::new(ScriptedBackend::new().with_fragment_delay(Duration::from_millis(50)));
    let store = Arc::new(InMemoryPersistenceClient::new());
    backend.push_script(Script::reply(["Answer A"]));
    backend.push_script(Script::reply(["Answer B"]));
    let chat = controller(&backend, &store);

    assert!(matches!(chat.submit("A", vec![]), SubmitOutcome::Dispatch(_)));
    assert!(matches!(chat.submit("B", vec![]), SubmitOutcome::Queued(_)));
    chat.wait_idle().await;

    assert_eq!(backend.peak_in_flight(), 1);
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].last_user_content(), Some("A"));
    assert_eq!(requests[1].last_user_content(), Some("B"));
    assert!(requests[1].messages.iter().any(|m| m.content == "Answer A"));

    let contents: Vec<String> = chat.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["A", "Answer A", "B", "Answer B"]);
    assert!(chat.session().unwrap().is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_double_submit_sends_once() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);

    chat.submit("hello", vec![]);
    assert_eq!(chat.submit("hello", vec![]), SubmitOutcome::Duplicate);
    chat.wait_idle().await;

    assert_eq!(backend.requests().len(), 1);
    assert_eq!(chat.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_turn_appends_error_and_queue_continues() {
    let (backend, store) = setup();
    backend.push_script(Script::Refuse("backend down".to_string()));
    backend.push_script(Script::reply(["ok"]));
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();

    chat.submit("A", vec![]);
    chat.submit("B", vec![]);
    chat.wait_idle().await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 4);
    assert!(messages[1].is_error);
    assert!(messages[1].content.contains("backend down"));
    assert_eq!(messages[3].content, "ok");
    assert!(!messages[3].is_error);

    let failures = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::TurnFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_keeps_no_partial_answer() {
    let (backend, store) = setup();
    backend.push_script(Script::Break {
        fragments: vec!["partial".to_string()],
        error: "connection reset".to_string(),
    });
    let chat = controller(&backend, &store);

    chat.submit("A", vec![]);
    chat.wait_idle().await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_error);
    assert!(!messages.iter().any(|m| m.content == "partial"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_answer_drops_turn() {
    let (backend, store) = setup();
    backend.push_script(Script::reply(["  ", "\n"]));
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();

    chat.submit("A", vec![]);
    chat.wait_idle().await;

    assert_eq!(chat.messages().len(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::TurnDropped { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_fragments_stream_and_answer_is_partitioned() {
    let (backend, store) = setup();
    backend.push_script(Script::reply(["Reasoning: consider X.", "\n\nFinal: the answer is Y."]));
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();

    chat.submit("why?", vec![]);
    chat.wait_idle().await;

    let events = drain(&mut events);
    let texts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Fragment { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[1], "Reasoning: consider X.\n\nFinal: the answer is Y.");
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::TurnCompleted {
            placement: ReplyPlacement::Appended,
            ..
        }
    )));

    let answer = chat.messages().pop().unwrap();
    assert_eq!(answer.thinking.as_deref(), Some("Reasoning: consider X."));
    assert_eq!(answer.content, "Final: the answer is Y.");
}

#[tokio::test(start_paused = true)]
async fn test_session_is_created_on_first_turn_only() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);

    chat.open();
    chat.toggle_square();
    chat.move_to(Point::new(5.0, 5.0));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(chat.session().is_none());
    assert!(store.is_empty());

    chat.submit("hi", vec![]);
    chat.wait_idle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stored = store.load(chat.id()).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.window.collapse_state, CollapseState::Square);
}

#[tokio::test(start_paused = true)]
async fn test_geometry_bursts_collapse_into_one_write() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    chat.submit("hi", vec![]);
    chat.wait_idle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = store.save_count();

    for x in [10.0, 20.0, 30.0] {
        chat.move_to(Point::new(x, 40.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    chat.toggle_rectangle();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(store.save_count(), before + 1);
    let stored = store.load(chat.id()).await.unwrap().unwrap();
    assert_eq!(stored.window.position, Point::new(30.0, 40.0));
    assert_eq!(stored.window.collapse_state, CollapseState::Rectangle);
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_write() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();
    chat.open();
    chat.submit("hi", vec![]);
    chat.wait_idle().await;

    chat.move_to(Point::new(300.0, 300.0));
    assert!(chat.close().await);

    let stored = store.load(chat.id()).await.unwrap().unwrap();
    assert_eq!(stored.window.position, Point::new(300.0, 300.0));
    assert!(!chat.is_open());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::WindowClosed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_collapse_keeps_expanded_size() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    let page = page();
    chat.resize(&page, Size::new(500.0, 640.0));

    chat.toggle_rectangle();
    assert_eq!(chat.displayed_size(), Size::new(500.0, 44.0));
    chat.toggle_rectangle();
    chat.toggle_square();
    assert_eq!(chat.displayed_size(), Size::new(48.0, 48.0));
    assert!(chat.expand());

    assert_eq!(chat.displayed_size(), Size::new(500.0, 640.0));
}

#[tokio::test]
async fn test_drag_then_refresh_does_not_move_window() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    let page = page();
    chat.refresh_anchor(&page);

    chat.begin_drag();
    chat.move_to(Point::new(130.0, 190.0));
    chat.end_drag(&page);
    let tick = chat.refresh_anchor(&page);

    assert!(!tick.changed_state());
    assert_eq!(chat.window().position, Point::new(130.0, 190.0));
}

#[tokio::test(start_paused = true)]
async fn test_queue_entries_can_be_removed_before_dispatch() {
    let backend = Arc::new(ScriptedBackend::new().with_fragment_delay(Duration::from_millis(100)));
    let store = Arc::new(InMemoryPersistenceClient::new());
    let chat = controller(&backend, &store);

    chat.submit("A", vec![]);
    let SubmitOutcome::Queued(b) = chat.submit("B", vec![]) else {
        panic!("B should wait behind A");
    };
    chat.submit("C", vec![]);
    assert!(chat.remove_queued(&b.id));
    assert_eq!(chat.queued().len(), 1);
    chat.wait_idle().await;

    let sent: Vec<String> = backend
        .requests()
        .iter()
        .filter_map(|r| r.last_user_content().map(str::to_string))
        .collect();
    assert_eq!(sent, vec!["A", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_leaves_in_flight_turn() {
    let backend = Arc::new(ScriptedBackend::new().with_fragment_delay(Duration::from_millis(100)));
    let store = Arc::new(InMemoryPersistenceClient::new());
    let chat = controller(&backend, &store);

    chat.submit("A", vec![]);
    chat.submit("B", vec![]);
    chat.submit("C", vec![]);
    assert_eq!(chat.clear_queue(), 2);
    chat.wait_idle().await;

    assert_eq!(backend.requests().len(), 1);
    assert_eq!(chat.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_replace_last_reply_overwrites_previous_answer() {
    let (backend, store) = setup();
    backend.push_script(Script::reply(["first answer"]));
    backend.push_script(Script::reply(["second answer"]));
    let chat = controller(&backend, &store);
    chat.submit("A", vec![]);
    chat.wait_idle().await;

    assert!(chat.set_replace_last_reply(true));
    chat.submit("B", vec![]);
    chat.wait_idle().await;

    let contents: Vec<String> = chat.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["A", "second answer", "B"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_history_forgets_everything() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();
    chat.submit("hi", vec![]);
    chat.wait_idle().await;
    chat.flush().await;
    assert_eq!(store.len(), 1);

    chat.clear_history().await;

    assert!(chat.session().is_none());
    assert!(chat.messages().is_empty());
    assert!(store.load(chat.id()).await.unwrap().is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::HistoryCleared { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_clear_history_is_silent() {
    let backend = Arc::new(ScriptedBackend::new().with_fragment_delay(Duration::from_millis(100)));
    let store = Arc::new(InMemoryPersistenceClient::new());
    backend.push_script(Script::Break {
        fragments: vec!["partial".to_string()],
        error: "connection reset".to_string(),
    });
    let chat = controller(&backend, &store);
    let mut events = chat.subscribe();

    chat.submit("hi", vec![]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    chat.clear_history().await;
    chat.wait_idle().await;

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::HistoryCleared { .. })));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::TurnFailed { .. })));
    assert!(chat.messages().is_empty());
    assert!(!chat.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_restore_continues_stored_session() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    chat.submit("hi", vec![]);
    chat.wait_idle().await;
    chat.toggle_rectangle();
    chat.flush().await;

    let stored = store.load(chat.id()).await.unwrap().unwrap();
    let restored = ChatController::restore(stored, backend.clone(), store.clone(), EngineConfig::default()).unwrap();

    assert_eq!(restored.id(), chat.id());
    assert_eq!(restored.messages(), chat.messages());
    assert_eq!(restored.window().collapse_state, CollapseState::Rectangle);

    restored.submit("again", vec![]);
    restored.wait_idle().await;
    assert_eq!(restored.messages().len(), 4);
}

#[tokio::test]
async fn test_builder_requires_collaborators_and_anchors() {
    let (backend, store) = setup();

    let missing_backend = ChatController::builder()
        .page_url("https://a.test")
        .descriptor(card())
        .persistence(store.clone())
        .build();
    assert!(missing_backend.is_err());

    let no_anchor = ChatController::builder()
        .page_url("https://a.test")
        .backend(backend)
        .persistence(store)
        .build();
    assert!(matches!(no_anchor, Err(tether_engine::EngineError::NoDescriptors)));
}

#[tokio::test]
async fn test_event_stream_reports_window_lifecycle() {
    let (backend, store) = setup();
    let chat = controller(&backend, &store);
    let mut stream = chat.event_stream();

    chat.open();
    assert!(!chat.close().await);

    let opened = stream.next().await.unwrap().unwrap();
    assert!(matches!(opened, SessionEvent::WindowOpened { .. }));
    let closed = stream.next().await.unwrap().unwrap();
    assert!(matches!(
        closed,
        SessionEvent::WindowClosed {
            scope: SessionScope::Element,
            ..
        }
    ));
    assert_eq!(store.save_count(), 0);
}
