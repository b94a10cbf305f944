//! Infrastructure layer for Parley.
//!
//! Implements the ports defined in `parley-core`: the SQLite durable tier,
//! the in-process fast tier, generation backends (OpenAI-compatible and
//! Ollama), the HTTP tool gateway client, and config-backed agents.
//! [`bootstrap::Engine`] wires them together.

pub mod agents;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod llm;
pub mod sqlite;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;
