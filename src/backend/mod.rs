pub mod memory;
pub mod scaffolding;
#[cfg(feature = "sql")]
pub mod sql;

pub use memory::{InMemoryBackend, InMemoryStore};
#[cfg(feature = "sql")]
pub use sql::SqlBackend;
