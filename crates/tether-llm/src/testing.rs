//! Scripted backend for tests and the simulation binary

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::traits::{ChatBackend, ChatRequest, FragmentStream};

/// Canned behaviour for one call to `send`
#[derive(Debug, Clone)]
pub enum Script {
    Reply(Vec<String>),
    /// `send` itself fails
    Refuse(String),
    /// Emit some fragments, then fail mid-stream
    Break { fragments: Vec<String>, error: String },
}

impl Script {
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Reply(fragments.into_iter().map(Into::into).collect())
    }
}

struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plays back queued scripts in order; once exhausted it echoes the last user message
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    fragment_delay: Duration,
    current: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fragment_delay: Duration::ZERO,
            current: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before each fragment
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Highest number of streams that were open at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, request: ChatRequest) -> Result<FragmentStream> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                let echo = request.last_user_content().unwrap_or_default();
                Script::reply([format!("Echo: {echo}")])
            });
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let (fragments, error) = match script {
            Script::Refuse(reason) => return Err(anyhow!(reason)),
            Script::Reply(fragments) => (fragments, None),
            Script::Break { fragments, error } => (fragments, Some(error)),
        };

        let open = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        let guard = InFlightGuard {
            current: Arc::clone(&self.current),
        };
        let delay = self.fragment_delay;

        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment);
            }
            if let Some(error) = error {
                yield Err(anyhow!(error));
            }
        }))
    }
}
