//! Shared domain types for Parley.
//!
//! This crate contains the types used across the chat engine: sessions and
//! messages, generation requests and events, agent and engine configuration,
//! tool descriptions, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod tool;
