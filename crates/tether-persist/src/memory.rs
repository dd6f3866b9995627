use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tether_types::ChatSession;

use crate::error::{PersistError, Result};
use crate::trait_client::PersistenceClient;

/// Key-value store holding each session as a JSON document
#[derive(Default)]
pub struct InMemoryPersistenceClient {
    documents: Mutex<BTreeMap<String, String>>,
    saves: AtomicUsize,
    failing_saves: AtomicUsize,
}

impl InMemoryPersistenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make the next `count` saves fail with a storage error
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    pub fn raw(&self, session_id: &str) -> Option<String> {
        self.documents().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents().is_empty()
    }

    fn documents(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PersistenceClient for InMemoryPersistenceClient {
    async fn save(&self, session: &ChatSession) -> Result<()> {
        if self.take_injected_failure() {
            return Err(PersistError::Storage(format!("write rejected for {}", session.id)));
        }
        let document = serde_json::to_string(session)?;
        self.documents().insert(session.id.clone(), document);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let Some(document) = self.raw(session_id) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&document)?))
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.documents().remove(session_id);
        Ok(())
    }

    async fn list_for_page(&self, page_url: &str) -> Result<Vec<ChatSession>> {
        let documents: Vec<String> = self.documents().values().cloned().collect();
        let mut sessions = Vec::new();
        for document in documents {
            let session: ChatSession = serde_json::from_str(&document)?;
            if session.page_url == page_url {
                sessions.push(session);
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}
