//! Storage ports for the two-tier context store.
//!
//! `DurableStore` is the authoritative tier; `FastCache` is an expiring
//! key-value tier in front of it. Implementations live in parley-infra
//! (e.g., `SqliteDurableStore`, `InMemoryCache`).
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).

use std::time::Duration;

use chrono::{DateTime, Utc};

use parley_types::chat::{ChatMessage, ChatSession};
use parley_types::error::{CacheError, RepositoryError};

/// Authoritative, append-only storage for sessions and their messages.
pub trait DurableStore: Send + Sync {
    /// Insert a new session record.
    fn create_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Look up a session by its token regardless of owner.
    fn get_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, RepositoryError>> + Send;

    /// Bump `last_activity_at`.
    fn touch_session(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append one message to the end of its session.
    fn append(
        &self,
        message: &ChatMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Read the newest `limit` messages (all when `None`), oldest first.
    fn read(
        &self,
        session_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;

    /// Delete all but the newest `keep` messages. Returns how many were removed.
    fn trim(
        &self,
        session_id: &str,
        keep: usize,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Sessions owned by `user_id`, most recently active first.
    fn list_sessions(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, RepositoryError>> + Send;

    /// Delete a session and its messages. Returns `false` if nothing matched.
    fn delete_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every session owned by `user_id`. Returns the number removed.
    fn delete_all_sessions(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Expiring key-value tier.
///
/// Values are opaque strings; the context store owns their encoding.
pub trait FastCache: Send + Sync {
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Insert or overwrite `key`, expiring `ttl` from now.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;
}
