pub mod config;
pub mod descriptor;
pub mod geometry;
pub mod message;
pub mod session;
pub mod window;

pub use config::{EngineConfig, DEFAULT_SYSTEM_PREAMBLE};
pub use descriptor::{AnchorKey, ElementDescriptor};
pub use geometry::{Point, Rect, Size};
pub use message::{ChatMessage, ImageAttachment, MessageRole, QueuedMessage};
pub use session::{ChatSession, SessionScope};
pub use window::{CollapseState, WindowState};
