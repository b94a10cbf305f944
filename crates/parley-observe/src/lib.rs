//! Observability setup for Parley.
//!
//! `tracing_setup` installs the global subscriber; `genai_attrs` holds the
//! span field names used around backend calls.

pub mod genai_attrs;
pub mod tracing_setup;
