pub mod debounce;
pub mod error;
pub mod memory;
pub mod trait_client;

pub use debounce::PersistDebouncer;
pub use error::{PersistError, Result};
pub use memory::InMemoryPersistenceClient;
pub use trait_client::PersistenceClient;
