//! In-memory page used by tests and the simulation binary.
//!
//! Nodes declare which selectors and structural path they answer to instead of
//! running a real selector engine; mutation helpers mimic scrolling, re-renders
//! and removals.

use std::collections::BTreeMap;
use tether_types::Rect;

use crate::surface::{PageSurface, SelectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

#[derive(Debug, Clone)]
pub struct NodeSpec {
    tag: String,
    id: Option<String>,
    attributes: BTreeMap<String, String>,
    selectors: Vec<String>,
    xpath: Option<String>,
    rect: Rect,
}

impl NodeSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            attributes: BTreeMap::new(),
            selectors: Vec::new(),
            xpath: None,
            rect: Rect::default(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    handle: NodeHandle,
    spec: NodeSpec,
    connected: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryPage {
    nodes: Vec<Node>,
    next_handle: u64,
}

impl InMemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: NodeSpec) -> NodeHandle {
        self.next_handle += 1;
        let handle = NodeHandle(self.next_handle);
        self.nodes.push(Node { handle, spec, connected: true });
        handle
    }

    pub fn tag(&self, handle: NodeHandle) -> Option<&str> {
        self.node(handle).map(|n| n.spec.tag.as_str())
    }

    pub fn set_rect(&mut self, handle: NodeHandle, rect: Rect) {
        if let Some(node) = self.node_mut(handle) {
            node.spec.rect = rect;
        }
    }

    /// Scrolling the document moves every element the opposite way in the viewport
    pub fn scroll_by(&mut self, dx: f64, dy: f64) {
        for node in &mut self.nodes {
            node.spec.rect.left -= dx;
            node.spec.rect.top -= dy;
        }
    }

    pub fn remove(&mut self, handle: NodeHandle) {
        if let Some(node) = self.node_mut(handle) {
            node.connected = false;
        }
    }

    /// Replace a node with a fresh copy, the way a framework re-render does
    pub fn rerender(&mut self, handle: NodeHandle) -> Option<NodeHandle> {
        let spec = self.node(handle).filter(|n| n.connected)?.spec.clone();
        self.remove(handle);
        Some(self.insert(spec))
    }

    fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.iter().find(|n| n.handle == handle)
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.handle == handle)
    }

    fn connected(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.connected)
    }
}

fn validate_selector(selector: &str) -> Result<(), SelectorError> {
    let invalid = |reason: &str| SelectorError::Invalid {
        selector: selector.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty selector"));
    }
    if trimmed.starts_with(['>', '+', '~', ',']) {
        return Err(invalid("dangling combinator"));
    }

    let mut depth: i32 = 0;
    for c in trimmed.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(invalid("unbalanced brackets"));
        }
    }
    if depth != 0 {
        return Err(invalid("unbalanced brackets"));
    }
    Ok(())
}

impl PageSurface for InMemoryPage {
    type Element = NodeHandle;

    fn element_by_id(&self, id: &str) -> Option<NodeHandle> {
        self.connected()
            .find(|n| n.spec.id.as_deref() == Some(id))
            .map(|n| n.handle)
    }

    fn query_selector(&self, selector: &str) -> Result<Option<NodeHandle>, SelectorError> {
        validate_selector(selector)?;
        Ok(self
            .connected()
            .find(|n| n.spec.selectors.iter().any(|s| s == selector))
            .map(|n| n.handle))
    }

    fn elements_with_attribute(&self, attribute: &str, value: &str) -> Vec<NodeHandle> {
        self.connected()
            .filter(|n| n.spec.attributes.get(attribute).map(String::as_str) == Some(value))
            .map(|n| n.handle)
            .collect()
    }

    fn element_by_xpath(&self, xpath: &str) -> Option<NodeHandle> {
        self.connected()
            .find(|n| n.spec.xpath.as_deref() == Some(xpath))
            .map(|n| n.handle)
    }

    fn bounding_rect(&self, element: &NodeHandle) -> Rect {
        self.node(*element)
            .filter(|n| n.connected)
            .map(|n| n.spec.rect)
            .unwrap_or_default()
    }

    fn is_connected(&self, element: &NodeHandle) -> bool {
        self.node(*element).is_some_and(|n| n.connected)
    }
}
