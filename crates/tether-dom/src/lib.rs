pub mod resolver;
pub mod surface;
#[cfg(feature = "testing")]
pub mod testing;

pub use resolver::{DescriptorResolver, Resolved, ResolvedBy};
pub use surface::{PageSurface, SelectorError};
#[cfg(feature = "testing")]
pub use testing::{InMemoryPage, NodeHandle, NodeSpec};
