//! Keeps a chat window visually pinned to the elements its chat is about.
//!
//! The registry never stores elements. Every tick re-resolves the descriptors,
//! picks the best live anchor and moves the window so that its offset from that
//! anchor stays what the user last left it at.

use tether_dom::{DescriptorResolver, PageSurface};
use tether_types::{AnchorKey, ElementDescriptor, EngineConfig, Point, Rect, WindowState};
use tracing::debug;

use crate::error::EngineError;

/// Result of one "ensure anchor position" pass
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorTick {
    /// No descriptor resolved; the window was left alone
    Missing,
    Anchored {
        anchor: AnchorKey,
        /// New window position, when it had to move
        moved_to: Option<Point>,
        /// The active anchor changed during this pass
        switched: bool,
        /// No offset was cached, so the current one was adopted
        inferred_offset: bool,
    },
}

impl AnchorTick {
    pub fn is_missing(&self) -> bool {
        matches!(self, AnchorTick::Missing)
    }

    /// Whether the pass changed window state that should be persisted
    pub fn changed_state(&self) -> bool {
        match self {
            AnchorTick::Missing => false,
            AnchorTick::Anchored {
                moved_to,
                switched,
                inferred_offset,
                ..
            } => moved_to.is_some() || *switched || *inferred_offset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    descriptors: Vec<ElementDescriptor>,
    dragging: bool,
    missing: bool,
    epsilon: f64,
    nudge: f64,
    max_default_offset_x: f64,
}

impl AnchorRegistry {
    pub fn new(descriptors: Vec<ElementDescriptor>, config: &EngineConfig) -> Result<Self, EngineError> {
        if descriptors.is_empty() {
            return Err(EngineError::NoDescriptors);
        }
        Ok(Self {
            descriptors,
            dragging: false,
            missing: false,
            epsilon: config.reposition_epsilon_px,
            nudge: config.activation_nudge_px,
            max_default_offset_x: config.max_default_offset_x.abs(),
        })
    }

    pub fn descriptors(&self) -> &[ElementDescriptor] {
        &self.descriptors
    }

    pub fn keys(&self) -> Vec<AnchorKey> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(index, d)| AnchorKey::derive(d, index))
            .collect()
    }

    pub fn descriptor(&self, key: &AnchorKey) -> Option<&ElementDescriptor> {
        self.descriptors
            .iter()
            .enumerate()
            .find(|(index, d)| AnchorKey::derive(d, *index) == *key)
            .map(|(_, d)| d)
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Whether the last pass found no live anchor
    pub fn is_missing(&self) -> bool {
        self.missing
    }

    /// Active anchor first, the rest in attachment order
    fn priority(&self, active: Option<&AnchorKey>) -> Vec<(AnchorKey, &ElementDescriptor)> {
        let mut keyed: Vec<_> = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(index, d)| (AnchorKey::derive(d, index), d))
            .collect();
        if let Some(position) = active.and_then(|active| keyed.iter().position(|(k, _)| k == active)) {
            let entry = keyed.remove(position);
            keyed.insert(0, entry);
        }
        keyed
    }

    fn first_live<P: PageSurface>(
        &self,
        page: &P,
        resolver: &DescriptorResolver,
        active: Option<&AnchorKey>,
    ) -> Option<(AnchorKey, Rect)> {
        self.priority(active)
            .into_iter()
            .find_map(|(key, d)| resolver.resolve_with_rect(page, d).map(|r| (key, r.rect)))
    }

    /// Re-resolve the anchors and pull the window back to its cached offset.
    ///
    /// Runs on every coalesced scroll, resize or mutation frame. A missing anchor
    /// is transient: the window stays put and the next frame tries again.
    pub fn ensure_anchor_position<P: PageSurface>(
        &mut self,
        page: &P,
        resolver: &DescriptorResolver,
        window: &mut WindowState,
    ) -> AnchorTick {
        let Some((key, rect)) = self.first_live(page, resolver, window.active_anchor.as_ref()) else {
            if !self.missing {
                debug!(anchors = self.descriptors.len(), "ANCHOR: no anchor resolves, holding window");
            }
            self.missing = true;
            return AnchorTick::Missing;
        };
        self.missing = false;

        let switched = window.active_anchor.as_ref() != Some(&key);
        if switched {
            debug!(anchor = %key, "ANCHOR: switching active anchor");
            window.active_anchor = Some(key.clone());
        }

        let (offset, inferred_offset) = match window.offset_for(&key) {
            Some(offset) => (offset, false),
            None => (window.position - rect.top_left(), true),
        };

        let mut moved_to = None;
        if !self.dragging {
            let target = rect.top_left() + offset;
            if !target.approx_eq(&window.position, self.epsilon) {
                window.position = target;
                moved_to = Some(target);
            }
        }

        window.anchor_offsets.insert(key.clone(), offset);

        AnchorTick::Anchored {
            anchor: key,
            moved_to,
            switched,
            inferred_offset,
        }
    }

    /// Make `key` the active anchor and place the window next to it.
    ///
    /// Uses the cached offset when there is one; otherwise derives a default that
    /// keeps the current horizontal relation (clamped) and drops the window just
    /// below the element. Returns the new window position, if the window moved.
    pub fn activate_anchor<P: PageSurface>(
        &mut self,
        page: &P,
        resolver: &DescriptorResolver,
        window: &mut WindowState,
        key: &AnchorKey,
    ) -> Result<Option<Point>, EngineError> {
        let descriptor = self
            .descriptor(key)
            .ok_or_else(|| EngineError::UnknownAnchor(key.to_string()))?;
        let resolved = resolver.resolve_with_rect(page, descriptor);
        window.active_anchor = Some(key.clone());

        let Some(rect) = resolved.map(|r| r.rect) else {
            debug!(anchor = %key, "ANCHOR: activated anchor is not on the page yet");
            return Ok(None);
        };

        let offset = match window.offset_for(key) {
            Some(offset) => offset,
            None => {
                let offset = self.default_offset(window.position, &rect);
                window.anchor_offsets.insert(key.clone(), offset);
                offset
            }
        };

        if self.dragging {
            return Ok(None);
        }
        let target = rect.top_left() + offset;
        window.position = target;
        Ok(Some(target))
    }

    fn default_offset(&self, position: Point, rect: &Rect) -> Point {
        let limit = self.max_default_offset_x;
        let x = (position.x - rect.left).max(-limit).min(limit);
        Point::new(x, rect.height + self.nudge)
    }

    /// Record the window's current offset from the active anchor
    pub fn capture_offset<P: PageSurface>(
        &mut self,
        page: &P,
        resolver: &DescriptorResolver,
        window: &mut WindowState,
    ) -> Option<Point> {
        let (key, rect) = match window.active_anchor.clone() {
            Some(key) => {
                let rect = resolver.resolve_with_rect(page, self.descriptor(&key)?)?.rect;
                (key, rect)
            }
            None => self.first_live(page, resolver, None)?,
        };
        let offset = window.position - rect.top_left();
        window.active_anchor = Some(key.clone());
        window.anchor_offsets.insert(key, offset);
        Some(offset)
    }

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    /// Stop suppressing repositioning and cache the offset the user dragged to
    pub fn end_drag<P: PageSurface>(
        &mut self,
        page: &P,
        resolver: &DescriptorResolver,
        window: &mut WindowState,
    ) -> Option<Point> {
        self.dragging = false;
        self.capture_offset(page, resolver, window)
    }

    /// Add a descriptor unless an equivalent one is already attached
    pub fn attach(&mut self, descriptor: ElementDescriptor) -> bool {
        let key = AnchorKey::derive(&descriptor, self.descriptors.len());
        let duplicate = self.descriptors.iter().enumerate().any(|(index, d)| {
            AnchorKey::derive(d, index) == key
                || (d.logical_id().is_some() && d.logical_id() == descriptor.logical_id())
        });
        if duplicate {
            return false;
        }
        self.descriptors.push(descriptor);
        true
    }

    /// Remove an anchor and its cached offset.
    ///
    /// Fallback keys embed the descriptor index, so anchors after the removed one
    /// may be re-keyed; their cached offsets and the active marker follow them.
    pub fn detach(&mut self, key: &AnchorKey, window: &mut WindowState) -> Result<ElementDescriptor, EngineError> {
        let old_keys = self.keys();
        let index = old_keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| EngineError::UnknownAnchor(key.to_string()))?;
        if self.descriptors.len() == 1 {
            return Err(EngineError::LastAnchor);
        }

        let removed = self.descriptors.remove(index);
        window.anchor_offsets.remove(key);
        let was_active = window.active_anchor.as_ref() == Some(key);
        if was_active {
            window.active_anchor = None;
        }

        let new_keys = self.keys();
        let survivors = old_keys
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, k)| k);
        for (old, new) in survivors.zip(new_keys.iter()) {
            if old == new {
                continue;
            }
            if let Some(offset) = window.anchor_offsets.remove(old) {
                window.anchor_offsets.insert(new.clone(), offset);
            }
            if window.active_anchor.as_ref() == Some(old) {
                window.active_anchor = Some(new.clone());
            }
        }

        if was_active {
            window.active_anchor = new_keys.first().cloned();
        }
        Ok(removed)
    }
}
