//! # Tether - chat windows anchored to page elements
//!
//! Tether is the engine behind a floating chat window that stays attached to
//! one or more elements of a page:
//! - **Anchoring** that survives scrolling, re-renders and selector drift
//! - **Streaming turns** with live fragments and a reasoning/answer split
//! - **Queued submissions** with duplicate suppression and one turn in flight
//! - **Debounced persistence** so sessions come back after a reload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let chat = ChatController::builder()
//!         .page_url("https://shop.example/item/42")
//!         .descriptor(ElementDescriptor::new("el-price", "span").with_id("price"))
//!         .backend(Arc::new(ScriptedBackend::new()))
//!         .persistence(Arc::new(InMemoryPersistenceClient::new()))
//!         .build()?;
//!
//!     chat.open();
//!     chat.submit("Is this price per unit?", vec![]);
//!     chat.wait_idle().await;
//!
//!     for message in chat.messages() {
//!         println!("{:?}: {}", message.role, message.content);
//!     }
//!     chat.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Tether consists of several composable crates:
//!
//! - **tether-types**: Core data (descriptors, messages, sessions, window state, config)
//! - **tether-dom**: Page abstraction and the descriptor resolver
//! - **tether-llm**: Backend trait, fragment aggregation and reply reconciliation
//! - **tether-persist**: Persistence client trait, in-memory store, write debouncer
//! - **tether-engine**: Chat controller, anchor registry, dispatch queue,
//!   indicators and the page-wide frame runtime
//!
//! ## Following the page
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # fn frame(runtime: &mut PageRuntime<NodeHandle>, page: &InMemoryPage) {
//! // Scroll and resize notifications coalesce into one frame
//! runtime.notify(FrameTrigger::Scroll);
//! runtime.notify(FrameTrigger::Resize);
//! if let Some(report) = runtime.on_animation_frame(page) {
//!     println!("re-anchored {} windows", report.anchors_refreshed);
//! }
//! # }
//! ```

pub use tether_dom as dom;
pub use tether_engine as engine;
pub use tether_llm as llm;
pub use tether_persist as persist;
pub use tether_types as types;

pub use tether_engine::{
    ChatController, ChatControllerBuilder, EngineError, FrameReport, FrameTrigger, PageRuntime, SessionEvent,
    SubmitOutcome,
};
pub use tether_types::{ChatMessage, ChatSession, ElementDescriptor, EngineConfig, SessionScope};

/// Prelude for convenient imports
pub mod prelude {
    pub use tether_dom::{DescriptorResolver, PageSurface};
    pub use tether_engine::{
        AnchorTick, ChatController, ChatControllerBuilder, EngineError, FrameReport, FrameTrigger, PageRuntime,
        SessionEvent, SubmitOutcome,
    };
    pub use tether_llm::{ChatBackend, ChatRequest, FragmentStream};
    pub use tether_persist::{PersistDebouncer, PersistenceClient};
    pub use tether_types::{
        AnchorKey, ChatMessage, ChatSession, CollapseState, ElementDescriptor, EngineConfig, ImageAttachment,
        MessageRole, Point, QueuedMessage, Rect, SessionScope, Size, WindowState,
    };

    #[cfg(feature = "testing")]
    pub use tether_dom::{InMemoryPage, NodeHandle, NodeSpec};
    #[cfg(feature = "testing")]
    pub use tether_llm::{Script, ScriptedBackend};
    pub use tether_persist::InMemoryPersistenceClient;

    pub use anyhow::Result;
    pub use async_trait::async_trait;
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_prelude_builds_a_working_chat() {
        tokio_test::block_on(async {
            let store = Arc::new(InMemoryPersistenceClient::new());
            let backend = Arc::new(ScriptedBackend::new());
            backend.push_script(Script::reply(["Yes, per unit."]));

            let chat = ChatController::builder()
                .page_url("https://shop.example/item/42")
                .descriptor(ElementDescriptor::new("el-price", "span").with_id("price"))
                .backend(backend)
                .persistence(store.clone())
                .config(EngineConfig::default().with_persist_debounce_ms(0))
                .build()
                .unwrap();

            assert!(matches!(chat.submit("per unit?", vec![]), SubmitOutcome::Dispatch(_)));
            chat.wait_idle().await;
            chat.flush().await;

            let messages = chat.messages();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[1].content, "Yes, per unit.");
            assert!(store.load(chat.id()).await.unwrap().is_some());
        });
    }
}
