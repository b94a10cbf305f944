//! SQLite storage layer.
//!
//! The durable chat-history tier, backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod history;
pub mod pool;

pub use history::SqliteDurableStore;
pub use pool::DatabasePool;
