pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryStore, MemoryUnit};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresStore, PostgresUnit};
