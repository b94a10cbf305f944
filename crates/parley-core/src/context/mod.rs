//! Two-tier conversation history.

pub mod hybrid;
pub mod store;

pub use hybrid::HybridContextStore;
pub use store::{DurableStore, FastCache};
