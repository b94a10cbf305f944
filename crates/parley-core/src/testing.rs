//! In-memory test doubles for the core ports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use parley_types::agent::AgentConfig;
use parley_types::chat::{ChatMessage, ChatSession};
use parley_types::error::{CacheError, RepositoryError};
use parley_types::llm::{GenerationEvent, GenerationRequest, LlmError};
use parley_types::tool::{ToolError, ToolSpec};

use crate::agents::AgentConfigProvider;
use crate::context::{DurableStore, FastCache};
use crate::llm::backend::{GenerationBackend, GenerationStream};
use crate::llm::matcher::ModelMatcher;
use crate::tools::{ResolvedTools, Tool};

// --- Durable tier ---

#[derive(Default)]
struct DurableState {
    sessions: HashMap<String, ChatSession>,
    messages: Vec<ChatMessage>,
}

/// Vec-backed durable tier with failure switches. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    state: Arc<Mutex<DurableState>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    miss_next_lookup: Arc<AtomicBool>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Report the next `get_session` as absent, as if another writer
    /// created the session right after the lookup.
    pub fn miss_next_lookup(&self) {
        self.miss_next_lookup.store(true, Ordering::SeqCst);
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Every stored message, in insertion order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    fn check_read(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }
}

impl DurableStore for MemoryDurableStore {
    async fn create_session(&self, session: &ChatSession) -> Result<(), RepositoryError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        if state.sessions.contains_key(&session.session_id) {
            return Err(RepositoryError::Conflict(session.session_id.clone()));
        }
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, RepositoryError> {
        self.check_read()?;
        if self.miss_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.state.lock().unwrap().sessions.get(session_id).cloned())
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.check_write()?;
        if let Some(session) = self.state.lock().unwrap().sessions.get_mut(session_id) {
            session.last_activity_at = at;
        }
        Ok(())
    }

    async fn append(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.state.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    async fn read(
        &self,
        session_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.user_id == user_id)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
        }
        Ok(messages)
    }

    async fn trim(&self, session_id: &str, keep: usize) -> Result<u64, RepositoryError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        let total = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .count();
        let mut excess = total.saturating_sub(keep);
        let removed = excess as u64;
        state.messages.retain(|m| {
            if excess > 0 && m.session_id == session_id {
                excess -= 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, RepositoryError> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool, RepositoryError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        let owned = state
            .sessions
            .get(session_id)
            .is_some_and(|s| s.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        state.sessions.remove(session_id);
        state.messages.retain(|m| m.session_id != session_id);
        Ok(true)
    }

    async fn delete_all_sessions(&self, user_id: &str) -> Result<u64, RepositoryError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        state.messages.retain(|m| m.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }
}

// --- Fast tier ---

/// Expiring map on tokio's clock so paused-time tests control TTLs.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    fail_all: Arc<AtomicBool>,
    fail_sets: Arc<AtomicBool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Whether `key` is present and unexpired.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|(_, expires_at)| Instant::now() < *expires_at)
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache down".to_string()));
        }
        Ok(())
    }
}

impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("write rejected".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// --- Agents ---

/// Fixed agent list. Owner visibility is applied like the real provider.
#[derive(Clone, Default)]
pub struct StaticAgents {
    agents: Vec<AgentConfig>,
    fail: Arc<AtomicBool>,
}

impl StaticAgents {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self {
            agents,
            fail: Arc::default(),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl AgentConfigProvider for StaticAgents {
    async fn get(&self, agent_id: i64, user_id: &str) -> Result<Option<AgentConfig>, RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self
            .agents
            .iter()
            .find(|a| a.agent_id == agent_id && a.is_visible_to(user_id))
            .cloned())
    }
}

pub fn agent(agent_id: i64, model: &str) -> AgentConfig {
    AgentConfig {
        agent_id,
        owner_id: None,
        model: model.to_string(),
        instruction: String::new(),
        tool_names: vec![],
        extended_retrieval_enabled: false,
    }
}

// --- Tools ---

/// Static tool returning a fixed payload.
pub struct FixedTool {
    pub name: &'static str,
    pub output: Value,
}

impl Tool for FixedTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: format!("{} test tool", self.name),
            parameters_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn invoke(&self, _args: Value) -> Result<Value, ToolError> {
        Ok(self.output.clone())
    }
}

// --- Backends ---

type Script = Vec<Result<GenerationEvent, LlmError>>;

/// Scripted backend that records every request it receives.
///
/// Each `generate` call replays the next queued script, or the default
/// reply once the queue is empty.
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    matcher: ModelMatcher,
    models: Vec<String>,
    reply: Vec<String>,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    tool_sets: Arc<Mutex<Vec<Vec<String>>>>,
    calls: Arc<AtomicUsize>,
    fragment_delay: Option<Duration>,
    first_event_delay: Option<Duration>,
    tool_call: Option<String>,
    cancellable: bool,
}

impl MockBackend {
    pub fn new(name: &str, matcher: ModelMatcher) -> Self {
        Self {
            name: name.to_string(),
            matcher,
            models: Vec::new(),
            reply: vec!["ok".to_string()],
            scripts: Arc::default(),
            requests: Arc::default(),
            tool_sets: Arc::default(),
            calls: Arc::default(),
            fragment_delay: None,
            first_event_delay: None,
            tool_call: None,
            cancellable: true,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Default reply, one fragment per element.
    pub fn replying(mut self, fragments: &[&str]) -> Self {
        self.reply = fragments.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Wait before the first event, like a slow time-to-first-token.
    pub fn with_first_event_delay(mut self, delay: Duration) -> Self {
        self.first_event_delay = Some(delay);
        self
    }

    /// Run the named tool once per generation before replaying the script.
    pub fn calling_tool(mut self, name: &str) -> Self {
        self.tool_call = Some(name.to_string());
        self
    }

    /// Ignore the cancellation token and report no cancellation hook.
    pub fn non_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queue a script that fails before producing anything.
    pub fn push_failure(&self, error: LlmError) {
        self.push_script(vec![Err(error)]);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Canonical tool names handed to each call.
    pub fn tool_sets(&self) -> Vec<Vec<String>> {
        self.tool_sets.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn matcher(&self) -> &ModelMatcher {
        &self.matcher
    }

    fn known_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellable
    }

    fn generate(
        &self,
        request: GenerationRequest,
        tools: ResolvedTools,
        cancel: CancellationToken,
    ) -> GenerationStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.tool_sets
            .lock()
            .unwrap()
            .push(tools.names().into_iter().map(str::to_string).collect());

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            self.reply
                .iter()
                .map(|t| Ok(GenerationEvent::TextDelta { text: t.clone() }))
                .chain(std::iter::once(Ok(GenerationEvent::Done)))
                .collect()
        });
        let delay = self.fragment_delay;
        let first_delay = self.first_event_delay;
        let tool_call = self.tool_call.clone();
        let cancellable = self.cancellable;

        Box::pin(async_stream::stream! {
            let mut stopped = false;
            if let Some(first_delay) = first_delay {
                if cancellable {
                    stopped = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(first_delay) => false,
                    };
                } else {
                    tokio::time::sleep(first_delay).await;
                }
            }
            if let Some(name) = tool_call.filter(|_| !stopped) {
                yield Ok(GenerationEvent::ToolCall { name: name.clone() });
                if let Err(e) = tools.invoke(&name, json!({})).await {
                    tracing::debug!(error = %e, "Scripted tool call failed");
                }
            }
            let script = if stopped { Vec::new() } else { script };
            for (i, item) in script.into_iter().enumerate() {
                if let Some(delay) = delay.filter(|_| i > 0) {
                    let stopped = if cancellable {
                        tokio::select! {
                            _ = cancel.cancelled() => true,
                            _ = tokio::time::sleep(delay) => false,
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                        false
                    };
                    if stopped {
                        break;
                    }
                }
                yield item;
            }
        })
    }
}
