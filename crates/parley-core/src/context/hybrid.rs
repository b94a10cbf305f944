//! Hybrid two-tier conversation store.
//!
//! Writes go to the durable tier first and fail the request if it is down.
//! The fast tier is then updated best-effort; any failure there deletes the
//! key so stale history is never served, and reads fall back to the durable
//! tier. Every fast-tier hit re-sets the key, giving a sliding expiry.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use parley_types::chat::{ChatMessage, ChatSession, MessageRole};
use parley_types::config::ContextConfig;
use parley_types::error::{ChatError, RepositoryError};

use super::store::{DurableStore, FastCache};

/// Shape of a fast-tier entry. The owner travels with the messages so a hit
/// can be ownership-checked without touching the durable tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedHistory {
    user_id: String,
    messages: Vec<ChatMessage>,
}

fn cache_key(session_id: &str) -> String {
    format!("parley:history:{session_id}")
}

/// Keep only the newest `limit` messages.
fn tail(mut messages: Vec<ChatMessage>, limit: Option<usize>) -> Vec<ChatMessage> {
    if let Some(limit) = limit {
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
    }
    messages
}

/// Per-session history over a durable tier and an expiring fast tier.
pub struct HybridContextStore<D, C> {
    durable: D,
    cache: C,
    config: ContextConfig,
}

impl<D: DurableStore, C: FastCache> HybridContextStore<D, C> {
    pub fn new(durable: D, cache: C, config: ContextConfig) -> Self {
        Self {
            durable,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Resolve the session for a request, creating it when needed.
    ///
    /// - no token (or an empty one): a fresh session with a new token
    /// - token owned by `user_id`: that session, with its activity bumped
    /// - token owned by someone else: [`ChatError::SessionOwnership`]
    /// - unknown token: a fresh session adopting the supplied token
    pub async fn get_or_create_session(
        &self,
        session_id: Option<&str>,
        user_id: &str,
        agent_id: i64,
    ) -> Result<ChatSession, ChatError> {
        let requested = session_id.map(str::trim).filter(|s| !s.is_empty());

        let Some(session_id) = requested else {
            let session = ChatSession::new(user_id, agent_id);
            self.durable.create_session(&session).await?;
            tracing::info!(session_id = %session.session_id, user_id, agent_id, "Created session");
            return Ok(session);
        };

        if let Some(existing) = self.durable.get_session(session_id).await? {
            return self.resume(existing, user_id).await;
        }

        let session = ChatSession::with_id(session_id, user_id, agent_id);
        match self.durable.create_session(&session).await {
            Ok(()) => {
                tracing::info!(session_id, user_id, agent_id, "Unknown session token, starting fresh");
                Ok(session)
            }
            Err(RepositoryError::Conflict(_)) => {
                // Another request created it between our lookup and insert.
                tracing::debug!(session_id, "Session created concurrently, re-reading");
                match self.durable.get_session(session_id).await? {
                    Some(existing) => self.resume(existing, user_id).await,
                    None => Err(ChatError::SessionStoreUnavailable(format!(
                        "session '{session_id}' conflicted on create but cannot be read"
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ownership check plus activity bump for an existing session.
    async fn resume(&self, mut session: ChatSession, user_id: &str) -> Result<ChatSession, ChatError> {
        if session.user_id != user_id {
            tracing::warn!(session_id = %session.session_id, user_id, "Session ownership mismatch");
            return Err(ChatError::SessionOwnership {
                session_id: session.session_id,
            });
        }
        let now = Utc::now();
        match self.durable.touch_session(&session.session_id, now).await {
            Ok(()) => session.last_activity_at = now,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "Failed to bump session activity");
            }
        }
        Ok(session)
    }

    /// Append a turn. The durable write is authoritative; the fast tier is
    /// updated afterwards on a best-effort basis.
    pub async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let message = ChatMessage::new(session_id, user_id, role, content);
        self.durable.append(&message).await?;

        match self.durable.trim(session_id, self.config.max_messages).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(session_id, removed, "Trimmed oldest messages"),
            Err(e) => tracing::warn!(session_id, error = %e, "Failed to trim session history"),
        }
        if let Err(e) = self.durable.touch_session(session_id, message.created_at).await {
            tracing::warn!(session_id, error = %e, "Failed to bump session activity");
        }

        self.push_to_cache(session_id, user_id, &message).await;
        Ok(message)
    }

    /// Fetch the newest `limit` messages (all retained when `None`), oldest first.
    pub async fn get_history(
        &self,
        session_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        if let Some(cached) = self.read_cache(session_id).await {
            if cached.user_id != user_id {
                return Err(ChatError::SessionOwnership {
                    session_id: session_id.to_string(),
                });
            }
            tracing::debug!(session_id, messages = cached.messages.len(), "History cache hit");
            // Re-set on every hit so active sessions never expire.
            self.write_cache(session_id, &cached).await;
            return Ok(tail(cached.messages, limit));
        }

        tracing::debug!(session_id, "History cache miss, reading durable tier");
        let session = self.durable.get_session(session_id).await?;
        match session {
            None => return Ok(Vec::new()),
            Some(session) if session.user_id != user_id => {
                return Err(ChatError::SessionOwnership {
                    session_id: session_id.to_string(),
                });
            }
            Some(_) => {}
        }

        let messages = self
            .durable
            .read(session_id, user_id, Some(self.config.max_messages))
            .await?;
        let cached = CachedHistory {
            user_id: user_id.to_string(),
            messages,
        };
        self.write_cache(session_id, &cached).await;
        Ok(tail(cached.messages, limit))
    }

    /// Tokens of every session owned by `user_id`, most recent first.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, ChatError> {
        let sessions = self.durable.list_sessions(user_id).await?;
        Ok(sessions.into_iter().map(|s| s.session_id).collect())
    }

    /// Delete one session. Unknown sessions are a no-op returning `false`.
    pub async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool, ChatError> {
        match self.durable.get_session(session_id).await? {
            None => return Ok(false),
            Some(session) if session.user_id != user_id => {
                return Err(ChatError::SessionOwnership {
                    session_id: session_id.to_string(),
                });
            }
            Some(_) => {}
        }

        let deleted = self.durable.delete_session(session_id, user_id).await?;
        self.evict(session_id).await;
        if deleted {
            tracing::info!(session_id, user_id, "Deleted session");
        }
        Ok(deleted)
    }

    /// Delete every session owned by `user_id`. Returns how many were removed.
    pub async fn delete_all_sessions(&self, user_id: &str) -> Result<u64, ChatError> {
        let sessions = self.durable.list_sessions(user_id).await?;
        let deleted = self.durable.delete_all_sessions(user_id).await?;
        for session in &sessions {
            self.evict(&session.session_id).await;
        }
        tracing::info!(user_id, deleted, "Deleted all sessions");
        Ok(deleted)
    }

    /// Drop the fast-tier entry for a session.
    pub async fn evict(&self, session_id: &str) {
        if let Err(e) = self.cache.delete(&cache_key(session_id)).await {
            tracing::warn!(session_id, error = %e, "Failed to evict history from cache");
        }
    }

    async fn read_cache(&self, session_id: &str) -> Option<CachedHistory> {
        let raw = match self.cache.get(&cache_key(session_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Fast tier unavailable, using durable tier");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Discarding undecodable cache entry");
                self.evict(session_id).await;
                None
            }
        }
    }

    async fn write_cache(&self, session_id: &str, cached: &CachedHistory) {
        let result = match serde_json::to_string(cached) {
            Ok(raw) => {
                self.cache
                    .set(&cache_key(session_id), raw, self.config.cache_ttl())
                    .await
            }
            Err(e) => Err(parley_types::error::CacheError::Serialization(e.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "Failed to update history cache");
            self.evict(session_id).await;
        }
    }

    /// Extend a cached history with a freshly committed message. A miss is
    /// left alone; the next read repopulates from the durable tier.
    async fn push_to_cache(&self, session_id: &str, user_id: &str, message: &ChatMessage) {
        let Some(mut cached) = self.read_cache(session_id).await else {
            return;
        };
        if cached.user_id != user_id {
            self.evict(session_id).await;
            return;
        }
        cached.messages.push(message.clone());
        let max = self.config.max_messages;
        if cached.messages.len() > max {
            cached.messages.drain(..cached.messages.len() - max);
        }
        self.write_cache(session_id, &cached).await;
    }
}
