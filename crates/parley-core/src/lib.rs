//! Orchestration logic and port traits for Parley.
//!
//! This crate defines the ports (durable store, fast cache, tool connection,
//! agent configuration, generation backend) that the infrastructure layer
//! implements. It depends only on `parley-types`, never on `parley-infra`
//! or any database/IO crate.

pub mod agents;
pub mod chat;
pub mod context;
pub mod llm;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;
