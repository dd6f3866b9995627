use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::geometry::Size;

pub const DEFAULT_SYSTEM_PREAMBLE: &str = "You are an assistant attached to specific elements of the web page the user is reading. \
Answer questions about those elements. Be concise and accurate. If the elements do not contain the answer, say so.";

/// Tunable constants of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing-edge debounce applied to persistence writes
    pub persist_debounce_ms: u64,
    /// Identical submissions inside this window are dropped
    pub duplicate_window_ms: u64,
    /// Minimum spacing between two dequeues
    pub dequeue_spacing_ms: u64,
    /// Vertical gap added below a freshly activated anchor
    pub activation_nudge_px: f64,
    /// Clamp for the horizontal part of a derived default offset
    pub max_default_offset_x: f64,
    /// Window moves smaller than this are skipped
    pub reposition_epsilon_px: f64,
    /// Tolerance when disambiguating duplicates by rectangle
    pub resolve_tolerance_px: f64,
    /// Attribute carrying the descriptor's logical identifier
    pub logical_id_attribute: String,
    pub rectangle_height: f64,
    pub square_size: f64,
    pub default_window_size: Size,
    pub system_preamble: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persist_debounce_ms: 500,
            duplicate_window_ms: 1500,
            dequeue_spacing_ms: 100,
            activation_nudge_px: 32.0,
            max_default_offset_x: 320.0,
            reposition_epsilon_px: 0.5,
            resolve_tolerance_px: 5.0,
            logical_id_attribute: "data-tether-id".to_string(),
            rectangle_height: 44.0,
            square_size: 48.0,
            default_window_size: Size::new(380.0, 520.0),
            system_preamble: DEFAULT_SYSTEM_PREAMBLE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    pub fn dequeue_spacing(&self) -> Duration {
        Duration::from_millis(self.dequeue_spacing_ms)
    }

    pub fn with_persist_debounce_ms(mut self, ms: u64) -> Self {
        self.persist_debounce_ms = ms;
        self
    }

    pub fn with_duplicate_window_ms(mut self, ms: u64) -> Self {
        self.duplicate_window_ms = ms;
        self
    }

    pub fn with_dequeue_spacing_ms(mut self, ms: u64) -> Self {
        self.dequeue_spacing_ms = ms;
        self
    }

    pub fn with_activation_nudge(mut self, px: f64) -> Self {
        self.activation_nudge_px = px;
        self
    }

    pub fn with_logical_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.logical_id_attribute = attribute.into();
        self
    }

    pub fn with_system_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.system_preamble = preamble.into();
        self
    }
}
