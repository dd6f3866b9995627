pub mod reconcile;
pub mod streaming;
#[cfg(feature = "testing")]
pub mod testing;
pub mod traits;

pub use reconcile::{apply_reply, AppliedReply, ReplyPlacement};
pub use streaming::{consume, partition, PartitionedAnswer, StreamAggregator};
#[cfg(feature = "testing")]
pub use testing::{Script, ScriptedBackend};
pub use traits::{ChatBackend, ChatRequest, FragmentStream};
