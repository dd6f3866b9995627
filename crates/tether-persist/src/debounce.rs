use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tether_types::ChatSession;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::trait_client::PersistenceClient;

#[derive(Default)]
struct PendingWrite {
    snapshot: Option<ChatSession>,
    deadline: Option<Instant>,
    worker_armed: bool,
    writes: u64,
}

struct Shared {
    state: Mutex<PendingWrite>,
    // Held across the save so a flush can never overtake an older snapshot
    write_lock: tokio::sync::Mutex<()>,
    client: Arc<dyn PersistenceClient>,
    delay: Duration,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PendingWrite> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write_latest(&self) -> bool {
        let _writing = self.write_lock.lock().await;
        let snapshot = {
            let mut state = self.state();
            state.deadline = None;
            state.snapshot.take()
        };
        let Some(snapshot) = snapshot else {
            return false;
        };

        match self.client.save(&snapshot).await {
            Ok(()) => {
                self.state().writes += 1;
                debug!(session_id = %snapshot.id, messages = snapshot.messages.len(), "session persisted");
                true
            }
            Err(e) => {
                warn!(session_id = %snapshot.id, error = %e, "failed to persist session");
                false
            }
        }
    }
}

/// Trailing-edge debounced writer for one session
///
/// Every `schedule` replaces the pending snapshot and pushes the deadline back, so a
/// burst of mutations ends in a single save of the last snapshot. Failed saves are
/// logged and dropped; the next scheduled write carries the newer state anyway.
#[derive(Clone)]
pub struct PersistDebouncer {
    shared: Arc<Shared>,
}

impl PersistDebouncer {
    pub fn new(client: Arc<dyn PersistenceClient>, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PendingWrite::default()),
                write_lock: tokio::sync::Mutex::new(()),
                client,
                delay,
            }),
        }
    }

    /// Queue `snapshot` for writing once no newer snapshot arrives within the delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, snapshot: ChatSession) {
        let spawn_worker = {
            let mut state = self.shared.state();
            state.snapshot = Some(snapshot);
            state.deadline = Some(Instant::now() + self.shared.delay);
            !std::mem::replace(&mut state.worker_armed, true)
        };
        if spawn_worker {
            tokio::spawn(run_worker(Arc::clone(&self.shared)));
        }
    }

    /// Write the pending snapshot now; returns whether anything was saved
    pub async fn flush(&self) -> bool {
        self.shared.write_latest().await
    }

    /// Drop the pending snapshot and wait out any save already running
    pub async fn cancel(&self) {
        {
            let mut state = self.shared.state();
            state.snapshot = None;
            state.deadline = None;
        }
        let _settled = self.shared.write_lock.lock().await;
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state().snapshot.is_some()
    }

    /// Successful saves performed through this debouncer
    pub fn writes(&self) -> u64 {
        self.shared.state().writes
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let deadline = {
            let mut state = shared.state();
            match state.deadline {
                Some(deadline) => deadline,
                None => {
                    state.worker_armed = false;
                    return;
                }
            }
        };

        tokio::time::sleep_until(deadline).await;

        let due = shared
            .state()
            .deadline
            .is_some_and(|deadline| deadline <= Instant::now());
        if due {
            shared.write_latest().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPersistenceClient;
    use tether_types::{ElementDescriptor, Point, SessionScope, Size, WindowState};

    fn session() -> ChatSession {
        ChatSession::new(
            "https://a.test",
            vec![ElementDescriptor::new("el-1", "div")],
            WindowState::new(Point::new(0.0, 0.0), Size::new(380.0, 520.0)),
            SessionScope::Element,
        )
        .unwrap()
    }

    fn debouncer() -> (Arc<InMemoryPersistenceClient>, PersistDebouncer) {
        let client = Arc::new(InMemoryPersistenceClient::new());
        let debouncer = PersistDebouncer::new(client.clone(), Duration::from_millis(500));
        (client, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_last_snapshot() {
        let (client, debouncer) = debouncer();
        let mut s = session();

        for x in [10.0, 20.0, 30.0] {
            s.window.position = Point::new(x, 0.0);
            debouncer.schedule(s.clone());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(client.save_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(client.save_count(), 1);
        let stored = client.load(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.window.position, Point::new(30.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_write_separately() {
        let (client, debouncer) = debouncer();
        let s = session();

        debouncer.schedule(s.clone());
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.schedule(s);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(client.save_count(), 2);
        assert_eq!(debouncer.writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately_once() {
        let (client, debouncer) = debouncer();

        debouncer.schedule(session());
        assert!(debouncer.flush().await);
        assert_eq!(client.save_count(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.save_count(), 1);
        assert!(!debouncer.flush().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_dropped_and_next_cycle_retries() {
        let (client, debouncer) = debouncer();
        client.fail_next_saves(1);

        debouncer.schedule(session());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.save_count(), 0);
        assert!(!debouncer.is_pending());

        debouncer.schedule(session());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_snapshot() {
        let (client, debouncer) = debouncer();

        debouncer.schedule(session());
        debouncer.cancel().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(client.save_count(), 0);
        assert!(!debouncer.is_pending());
    }
}
