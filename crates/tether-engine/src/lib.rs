pub mod anchor;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod frame;
pub mod indicator;
pub mod prompt;
pub mod runtime;
pub mod window;

pub use anchor::{AnchorRegistry, AnchorTick};
pub use controller::{ChatController, ChatControllerBuilder};
pub use dispatch::{DispatchQueue, NextDispatch, SubmitOutcome};
pub use error::EngineError;
pub use events::SessionEvent;
pub use frame::{FrameRequest, FrameScheduler, FrameTrigger};
pub use indicator::{Indicator, IndicatorSynchronizer, RepositionSummary};
pub use prompt::build_system_prompt;
pub use runtime::{FrameReport, PageRuntime};
pub use window::WindowStateMachine;
