use async_trait::async_trait;
use tether_types::ChatSession;

use crate::error::Result;

/// Storage for chat sessions
///
/// `save` is an upsert keyed by session id, so writing the same snapshot twice is harmless
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn save(&self, session: &ChatSession) -> Result<()>;

    async fn load(&self, session_id: &str) -> Result<Option<ChatSession>>;

    /// Remove a session; clearing an unknown id is not an error
    async fn clear(&self, session_id: &str) -> Result<()>;

    /// Every stored session belonging to a page, oldest first
    async fn list_for_page(&self, page_url: &str) -> Result<Vec<ChatSession>>;
}
