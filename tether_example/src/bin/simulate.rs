//! Walks one anchored chat through a scripted session on an in-memory page:
//! queued questions, a failing backend call, scrolling, attaching a second
//! element, closing, and restoring the conversation from the store.

use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tether_dom::{InMemoryPage, NodeHandle, NodeSpec};
use tether_engine::{ChatController, FrameTrigger, PageRuntime, SessionEvent, SubmitOutcome};
use tether_example::AppConfig;
use tether_llm::{Script, ScriptedBackend};
use tether_persist::{InMemoryPersistenceClient, PersistenceClient};
use tether_types::{ElementDescriptor, Point, Rect};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    println!("Tether - Simulated Session");
    println!("==========================\n");

    // 1. Build the page
    println!("1. Rendering page...");
    let mut page = InMemoryPage::new();
    page.insert(
        NodeSpec::new("span")
            .id("price")
            .attribute(config.engine.logical_id_attribute.as_str(), "price-tag")
            .rect(Rect::new(180.0, 40.0, 120.0, 24.0)),
    );
    page.insert(
        NodeSpec::new("p")
            .selector("main > p.description")
            .rect(Rect::new(240.0, 40.0, 480.0, 96.0)),
    );
    println!("   ✓ Two elements on {}\n", config.simulation.page_url);

    // 2. Wire the chat
    println!("2. Opening a chat on the price tag...");
    let backend = Arc::new(
        ScriptedBackend::new().with_fragment_delay(Duration::from_millis(config.simulation.fragment_delay_ms)),
    );
    backend.push_script(Script::reply([
        "The tag shows a single figure with no unit.",
        "\n\nIt is the price for one item.",
    ]));
    backend.push_script(Script::Refuse("backend unavailable".to_string()));
    backend.push_script(Script::reply(["Shipping is not mentioned next to the price."]));

    let store = Arc::new(InMemoryPersistenceClient::new());
    let chat = ChatController::builder()
        .page_url(config.simulation.page_url.clone())
        .descriptor(
            ElementDescriptor::new("el-price", "span")
                .with_id("price")
                .with_text_preview("$24.99")
                .with_rect(Rect::new(180.0, 40.0, 120.0, 24.0)),
        )
        .position(Point::new(40.0, 240.0))
        .backend(backend.clone())
        .persistence(store.clone())
        .config(config.engine.clone())
        .build()?;

    let mut runtime = PageRuntime::<NodeHandle>::new(&config.engine);
    runtime.register(chat.clone());
    chat.open();
    println!("   ✓ Chat {} open\n", chat.id());

    let mut events = chat.event_stream();
    let printer = tokio::spawn(async move {
        while let Some(Ok(event)) = events.next().await {
            match event {
                SessionEvent::Fragment { text, .. } => tracing::debug!(running = %text, "SIMULATE: fragment"),
                SessionEvent::TurnCompleted { placement, .. } => {
                    tracing::info!(?placement, "SIMULATE: turn completed")
                }
                SessionEvent::TurnFailed { error, .. } => tracing::warn!(%error, "SIMULATE: turn failed"),
                SessionEvent::QueueChanged { queued, .. } => {
                    tracing::info!(waiting = queued.len(), "SIMULATE: queue changed")
                }
                _ => {}
            }
        }
    });

    // 3. Ask in a burst
    println!("3. Submitting questions...");
    for question in [
        "Is this the price per unit?",
        "Is this the price per unit?",
        "Does it include shipping?",
        "Anything about shipping?",
    ] {
        let outcome = chat.submit(question, vec![]);
        let label = match outcome {
            SubmitOutcome::Dispatch(_) => "sent",
            SubmitOutcome::Queued(_) => "queued",
            SubmitOutcome::Duplicate => "dropped as duplicate",
            SubmitOutcome::Empty => "ignored",
        };
        println!("   {question:?} -> {label}");
    }
    chat.wait_idle().await;
    println!();

    for message in chat.messages() {
        let marker = if message.is_error { " (error)" } else { "" };
        println!("   [{:?}{}] {}", message.role, marker, message.content);
        if let Some(thinking) = &message.thinking {
            println!("      thinking: {thinking}");
        }
    }
    println!();

    // 4. Scroll the page
    println!("4. Scrolling...");
    runtime.on_animation_frame(&page);
    for _ in 0..config.simulation.scroll_frames {
        page.scroll_by(0.0, config.simulation.scroll_step_px);
        runtime.notify(FrameTrigger::Scroll);
        runtime.notify(FrameTrigger::Resize);
        if let Some(report) = runtime.on_animation_frame(&page) {
            let position = chat.window().position;
            println!(
                "   frame: {} trigger(s) coalesced, window at ({:.0}, {:.0}), missing anchors: {}",
                report.coalesced, position.x, position.y, report.anchors_missing
            );
        }
    }
    println!();

    // 5. Attach the description, then let it go again
    println!("5. Attaching the description...");
    let description = ElementDescriptor::new("el-desc", "p")
        .with_selector("main > p.description")
        .with_text_preview("Hand-thrown stoneware mug");
    chat.attach(description);
    let keys = chat.anchor_keys();
    println!("   ✓ Anchors: {:?}", keys.iter().map(|k| k.as_str()).collect::<Vec<_>>());
    if let Some(last) = keys.last() {
        let removed = chat.detach(last)?;
        println!("   ✓ Detached {}\n", removed.element_id);
    }

    // 6. Close and look at the markers
    println!("6. Closing the window...");
    chat.close().await;
    runtime.on_animation_frame(&page);
    for marker in runtime.indicators().markers() {
        println!(
            "   marker {} visible={} active={} at {:?}",
            marker.anchor.as_str(),
            marker.visible,
            marker.active,
            marker.position
        );
    }
    println!();

    // 7. Reload from the store
    println!("7. Restoring from persistence...");
    runtime.unregister(chat.id());
    let saved = store
        .load(chat.id())
        .await?
        .ok_or_else(|| anyhow::anyhow!("session {} was not saved", chat.id()))?;
    println!("   ✓ {} writes, {} messages stored", store.save_count(), saved.messages.len());

    let restored = ChatController::restore(saved, backend, store.clone(), config.engine.clone())?;
    runtime.register(restored.clone());
    runtime.on_animation_frame(&page);
    println!(
        "   ✓ Restored {} with {} messages and {} marker(s)",
        restored.id(),
        restored.messages().len(),
        runtime.indicators().len()
    );

    drop(chat);
    printer.abort();
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        }
        _ => {
            registry.with(tracing_subscriber::fmt::layer().pretty()).init();
        }
    }
}
