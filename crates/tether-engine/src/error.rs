use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("A chat needs at least one element descriptor")]
    NoDescriptors,

    #[error("Unknown anchor: {0}")]
    UnknownAnchor(String),

    #[error("Cannot detach the last anchor of a chat")]
    LastAnchor,

    #[error("{0} is required")]
    Missing(&'static str),
}
