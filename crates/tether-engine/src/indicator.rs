//! Small always-on markers showing which elements have a chat attached.
//!
//! Markers live independently of chat windows: they exist while a session has
//! messages, are hidden while that session's window is open, and survive their
//! element disappearing so they can come back when it is re-rendered.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tether_dom::{DescriptorResolver, PageSurface};
use tether_types::{AnchorKey, ElementDescriptor, Point, SessionScope};
use tracing::debug;

use crate::events::SessionEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct Indicator<E> {
    pub session_id: String,
    pub anchor: AnchorKey,
    pub descriptor: ElementDescriptor,
    /// Top-right corner of the anchor when last positioned
    pub position: Option<Point>,
    pub visible: bool,
    /// Marks the chat whose window was closed most recently
    pub active: bool,
    element: Option<E>,
}

impl<E> Indicator<E> {
    pub fn element(&self) -> Option<&E> {
        self.element.as_ref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositionSummary {
    pub visible: usize,
    pub hidden: usize,
}

type MarkerKey = (String, AnchorKey);

#[derive(Debug)]
pub struct IndicatorSynchronizer<E> {
    markers: BTreeMap<MarkerKey, Indicator<E>>,
    hidden_sessions: HashSet<String>,
}

impl<E> Default for IndicatorSynchronizer<E> {
    fn default() -> Self {
        Self {
            markers: BTreeMap::new(),
            hidden_sessions: HashSet::new(),
        }
    }
}

impl<E: Clone + PartialEq> IndicatorSynchronizer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh the marker for one anchor; returns true when it is new.
    ///
    /// Fallback anchor keys embed the descriptor's index, so a descriptor that
    /// moved within its session keeps its marker under the new key.
    pub fn upsert(&mut self, session_id: &str, descriptor: &ElementDescriptor, index: usize) -> bool {
        let anchor = AnchorKey::derive(descriptor, index);
        let key = (session_id.to_string(), anchor.clone());
        if !self.markers.contains_key(&key) {
            let previous = self
                .markers
                .iter()
                .find(|((session, _), marker)| session == session_id && marker.descriptor == *descriptor)
                .map(|(old, _)| old.clone());
            if let Some(mut marker) = previous.and_then(|old| self.markers.remove(&old)) {
                marker.anchor = anchor;
                self.markers.insert(key, marker);
                return false;
            }
        }
        if let Some(marker) = self.markers.get_mut(&key) {
            if marker.descriptor != *descriptor {
                marker.descriptor = descriptor.clone();
                marker.element = None;
            }
            return false;
        }
        self.markers.insert(
            key,
            Indicator {
                session_id: session_id.to_string(),
                anchor,
                descriptor: descriptor.clone(),
                position: None,
                visible: false,
                active: false,
                element: None,
            },
        );
        true
    }

    pub fn remove(&mut self, session_id: &str, anchor: &AnchorKey) -> bool {
        self.markers
            .remove(&(session_id.to_string(), anchor.clone()))
            .is_some()
    }

    pub fn remove_session(&mut self, session_id: &str) -> usize {
        let before = self.markers.len();
        self.markers.retain(|(session, _), _| session != session_id);
        self.hidden_sessions.remove(session_id);
        before - self.markers.len()
    }

    /// Make a session's markers match `descriptors` exactly
    pub fn sync_session(&mut self, session_id: &str, descriptors: &[ElementDescriptor]) {
        let mut wanted = BTreeSet::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            self.upsert(session_id, descriptor, index);
            wanted.insert(AnchorKey::derive(descriptor, index));
        }
        self.markers
            .retain(|(session, anchor), _| session != session_id || wanted.contains(anchor));
    }

    /// Hidden sessions keep their markers but never show them
    pub fn set_session_hidden(&mut self, session_id: &str, hidden: bool) {
        if hidden {
            self.hidden_sessions.insert(session_id.to_string());
            for marker in self.session_markers_mut(session_id) {
                marker.visible = false;
            }
        } else {
            self.hidden_sessions.remove(session_id);
        }
    }

    pub fn is_session_hidden(&self, session_id: &str) -> bool {
        self.hidden_sessions.contains(session_id)
    }

    /// Give one session's markers the "active" look and clear it everywhere else
    pub fn arm(&mut self, session_id: &str) {
        for marker in self.markers.values_mut() {
            marker.active = marker.session_id == session_id;
        }
    }

    fn session_markers_mut<'a>(&'a mut self, session_id: &'a str) -> impl Iterator<Item = &'a mut Indicator<E>> + 'a {
        self.markers
            .values_mut()
            .filter(move |m| m.session_id == session_id)
    }

    /// Apply one chat event; returns true when markers need repositioning
    pub fn on_session_event(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::WindowOpened { session_id } => self.set_session_hidden(session_id, true),
            SessionEvent::WindowClosed { session_id, scope } => {
                self.set_session_hidden(session_id, false);
                if *scope == SessionScope::Element {
                    self.arm(session_id);
                }
            }
            SessionEvent::AnchorsChanged {
                session_id,
                descriptors,
            } => self.sync_session(session_id, descriptors),
            SessionEvent::MessagesChanged {
                session_id,
                message_count: 0,
            }
            | SessionEvent::HistoryCleared { session_id } => {
                self.remove_session(session_id);
            }
            _ => return false,
        }
        true
    }

    /// Re-resolve every marker and place it on its anchor's top-right corner.
    ///
    /// A still-connected cached element is reused; otherwise the descriptor is
    /// resolved again. Unresolved and zero-sized anchors hide their marker but
    /// keep it registered.
    pub fn reposition<P>(&mut self, page: &P, resolver: &DescriptorResolver) -> RepositionSummary
    where
        P: PageSurface<Element = E>,
    {
        let mut summary = RepositionSummary::default();
        for marker in self.markers.values_mut() {
            let element = marker
                .element
                .take()
                .filter(|e| page.is_connected(e))
                .or_else(|| resolver.resolve(page, &marker.descriptor));

            let rect = element.as_ref().map(|e| page.bounding_rect(e));
            marker.element = element;

            match rect.filter(|r| !r.is_zero_sized()) {
                Some(rect) => {
                    marker.position = Some(Point::new(rect.left + rect.width, rect.top));
                    marker.visible = !self.hidden_sessions.contains(&marker.session_id);
                }
                None => {
                    if marker.visible {
                        debug!(session_id = %marker.session_id, anchor = %marker.anchor, "INDICATOR: anchor gone, hiding marker");
                    }
                    marker.visible = false;
                }
            }

            if marker.visible {
                summary.visible += 1;
            } else {
                summary.hidden += 1;
            }
        }
        summary
    }

    pub fn get(&self, session_id: &str, anchor: &AnchorKey) -> Option<&Indicator<E>> {
        self.markers.get(&(session_id.to_string(), anchor.clone()))
    }

    pub fn markers(&self) -> impl Iterator<Item = &Indicator<E>> {
        self.markers.values()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_dom::{InMemoryPage, NodeHandle, NodeSpec};
    use tether_types::Rect;

    fn desc_a() -> ElementDescriptor {
        ElementDescriptor::new("el-a", "div").with_id("a")
    }

    #[test]
    fn test_upsert_twice_keeps_one_marker() {
        let mut sync = IndicatorSynchronizer::<NodeHandle>::new();

        assert!(sync.upsert("chat_1", &desc_a(), 0));
        assert!(!sync.upsert("chat_1", &desc_a(), 0));

        assert_eq!(sync.len(), 1);
        assert!(sync.upsert("chat_2", &desc_a(), 0));
        assert_eq!(sync.len(), 2);
    }

    #[test]
    fn test_moved_fallback_descriptor_keeps_one_marker() {
        let mut sync = IndicatorSynchronizer::<NodeHandle>::new();
        let plain = ElementDescriptor::new("", "li").with_text_preview("second row");

        assert!(sync.upsert("chat_1", &plain, 1));
        assert!(!sync.upsert("chat_1", &plain, 0));

        assert_eq!(sync.len(), 1);
        assert!(sync.get("chat_1", &AnchorKey::from("index:0")).is_some());
        assert!(sync.get("chat_1", &AnchorKey::from("index:1")).is_none());
    }

    #[test]
    fn test_marker_sits_on_top_right_corner() {
        let mut page = InMemoryPage::new();
        page.insert(NodeSpec::new("div").id("a").rect(Rect::new(100.0, 50.0, 200.0, 40.0)));
        let mut sync = IndicatorSynchronizer::new();
        sync.upsert("chat_1", &desc_a(), 0);

        let summary = sync.reposition(&page, &DescriptorResolver::default());

        let marker = sync.get("chat_1", &AnchorKey::from("id:a")).unwrap();
        assert_eq!(summary, RepositionSummary { visible: 1, hidden: 0 });
        assert_eq!(marker.position, Some(Point::new(250.0, 100.0)));
        assert!(marker.visible);
    }

    #[test]
    fn test_missing_element_hides_but_keeps_marker() {
        let mut page = InMemoryPage::new();
        let node = page.insert(NodeSpec::new("div").id("a").rect(Rect::new(100.0, 50.0, 200.0, 40.0)));
        let resolver = DescriptorResolver::default();
        let mut sync = IndicatorSynchronizer::new();
        sync.upsert("chat_1", &desc_a(), 0);
        sync.reposition(&page, &resolver);

        let fresh = page.rerender(node);
        sync.reposition(&page, &resolver);
        let marker = sync.get("chat_1", &AnchorKey::from("id:a")).unwrap();
        assert!(marker.visible);
        assert_eq!(marker.element().copied(), fresh);

        page.remove(fresh.unwrap());
        sync.reposition(&page, &resolver);
        let marker = sync.get("chat_1", &AnchorKey::from("id:a")).unwrap();
        assert!(!marker.visible);
        assert_eq!(marker.position, Some(Point::new(250.0, 100.0)));
        assert_eq!(sync.len(), 1);
    }

    #[test]
    fn test_zero_sized_element_hides_marker() {
        let mut page = InMemoryPage::new();
        page.insert(NodeSpec::new("div").id("a").rect(Rect::new(100.0, 50.0, 0.0, 0.0)));
        let mut sync = IndicatorSynchronizer::new();
        sync.upsert("chat_1", &desc_a(), 0);

        let summary = sync.reposition(&page, &DescriptorResolver::default());

        assert_eq!(summary, RepositionSummary { visible: 0, hidden: 1 });
    }

    #[test]
    fn test_open_window_hides_session_markers() {
        let mut page = InMemoryPage::new();
        page.insert(NodeSpec::new("div").id("a").rect(Rect::new(100.0, 50.0, 200.0, 40.0)));
        let resolver = DescriptorResolver::default();
        let mut sync = IndicatorSynchronizer::new();
        sync.upsert("chat_1", &desc_a(), 0);

        sync.on_session_event(&SessionEvent::WindowOpened {
            session_id: "chat_1".to_string(),
        });
        assert_eq!(sync.reposition(&page, &resolver).visible, 0);

        sync.on_session_event(&SessionEvent::WindowClosed {
            session_id: "chat_1".to_string(),
            scope: SessionScope::Element,
        });
        assert_eq!(sync.reposition(&page, &resolver).visible, 1);
        assert!(sync.get("chat_1", &AnchorKey::from("id:a")).unwrap().active);
    }

    #[test]
    fn test_text_selection_close_does_not_arm() {
        let mut sync = IndicatorSynchronizer::<NodeHandle>::new();
        sync.upsert("chat_1", &desc_a(), 0);

        sync.on_session_event(&SessionEvent::WindowClosed {
            session_id: "chat_1".to_string(),
            scope: SessionScope::TextSelection,
        });

        assert!(!sync.get("chat_1", &AnchorKey::from("id:a")).unwrap().active);
    }

    #[test]
    fn test_sync_and_clear_follow_session() {
        let mut sync = IndicatorSynchronizer::<NodeHandle>::new();
        let desc_b = ElementDescriptor::new("el-b", "p").with_id("b");
        sync.sync_session("chat_1", &[desc_a(), desc_b.clone()]);
        assert_eq!(sync.len(), 2);

        sync.on_session_event(&SessionEvent::AnchorsChanged {
            session_id: "chat_1".to_string(),
            descriptors: vec![desc_b],
        });
        assert_eq!(sync.len(), 1);
        assert!(sync.get("chat_1", &AnchorKey::from("id:b")).is_some());

        sync.on_session_event(&SessionEvent::HistoryCleared {
            session_id: "chat_1".to_string(),
        });
        assert!(sync.is_empty());
    }
}
