use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::descriptor::AnchorKey;
use crate::geometry::{Point, Size};

/// Presentation level of the floating window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseState {
    #[default]
    Expanded,
    /// Header-only strip
    Rectangle,
    /// Icon-only square
    Square,
}

impl CollapseState {
    pub fn is_resizable(&self) -> bool {
        matches!(self, CollapseState::Expanded)
    }
}

/// Persisted geometry and UI toggles of one chat window.
///
/// `size` always holds the expanded size; collapsed presentations derive
/// their displayed size from `collapse_state` and leave `size` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub position: Point,
    pub size: Size,
    #[serde(default)]
    pub collapse_state: CollapseState,
    /// Offset from each anchor's top-left corner to the window's top-left corner
    #[serde(default)]
    pub anchor_offsets: BTreeMap<AnchorKey, Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_anchor: Option<AnchorKey>,
    #[serde(default)]
    pub queue_expanded: bool,
    #[serde(default)]
    pub replace_last_reply: bool,
}

impl WindowState {
    pub fn new(position: Point, size: Size) -> Self {
        Self {
            position,
            size,
            collapse_state: CollapseState::Expanded,
            anchor_offsets: BTreeMap::new(),
            active_anchor: None,
            queue_expanded: false,
            replace_last_reply: false,
        }
    }

    pub fn offset_for(&self, key: &AnchorKey) -> Option<Point> {
        self.anchor_offsets.get(key).copied()
    }
}
