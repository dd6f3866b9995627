use std::collections::BTreeSet;

/// Page notification that invalidates anchor geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameTrigger {
    Scroll,
    Resize,
    Mutation,
}

/// A coalesced frame: every trigger seen since the previous one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub triggers: BTreeSet<FrameTrigger>,
    pub coalesced: usize,
}

/// At most one pending geometry refresh, however many notifications arrive
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: Option<FrameRequest>,
    frames_run: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this call scheduled a new frame
    pub fn request(&mut self, trigger: FrameTrigger) -> bool {
        match &mut self.pending {
            Some(pending) => {
                pending.triggers.insert(trigger);
                pending.coalesced += 1;
                false
            }
            None => {
                self.pending = Some(FrameRequest {
                    triggers: BTreeSet::from([trigger]),
                    coalesced: 1,
                });
                true
            }
        }
    }

    /// Claim the pending frame, if any
    pub fn take(&mut self) -> Option<FrameRequest> {
        let frame = self.pending.take()?;
        self.frames_run += 1;
        Some(frame)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }
}
