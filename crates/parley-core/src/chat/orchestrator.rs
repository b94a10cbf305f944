//! The chat use case.
//!
//! One request runs as its own task: load the agent, route the model,
//! resolve the session, assemble history and tools, commit the user turn,
//! then stream generation under the retry policy and commit the reply.
//!
//! Dropping the returned [`ChatStream`] cancels the request. Text produced
//! up to that point is still committed. A backend without a cancellation
//! hook is drained in the background and its full reply committed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use parley_types::chat::{ChatEvent, ChatRequest, ChatResponse, MessageRole};
use parley_types::config::TimeoutConfig;
use parley_types::error::{ChatError, ErrorKind};
use parley_types::llm::{GenerationEvent, GenerationRequest, LlmError, Message};

use super::context::RequestContext;
use crate::agents::AgentConfigProvider;
use crate::context::{DurableStore, FastCache, HybridContextStore};
use crate::llm::backend::{prime, GenerationBackend, GenerationStream};
use crate::llm::retry::{classify, Retried, RetryPolicy};
use crate::llm::router::BackendRouter;
use crate::tools::{ResolvedTools, ToolRegistry};

/// Item type of a [`ChatStream`].
pub type ChatResult = Result<ChatEvent, ChatError>;

const EVENT_BUFFER: usize = 64;

/// Events for one chat request: text fragments, then `Done` or an error.
///
/// Dropping the stream cancels the request.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatResult>,
    _guard: DropGuard,
}

impl Stream for ChatStream {
    type Item = ChatResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// How the generation stream stopped.
enum StreamEnd {
    Completed,
    Failed(LlmError),
    Disconnected,
    TimedOut,
}

/// Output of the pre-generation phase.
struct Prepared {
    model: String,
    backend: Arc<dyn GenerationBackend>,
    session_id: String,
    generation: GenerationRequest,
    tools: ResolvedTools,
}

pub struct ChatOrchestrator<A, D, C> {
    agents: A,
    context: HybridContextStore<D, C>,
    tools: ToolRegistry,
    router: BackendRouter,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl<A, D, C> ChatOrchestrator<A, D, C>
where
    A: AgentConfigProvider + 'static,
    D: DurableStore + 'static,
    C: FastCache + 'static,
{
    pub fn new(
        agents: A,
        context: HybridContextStore<D, C>,
        tools: ToolRegistry,
        router: BackendRouter,
    ) -> Self {
        Self {
            agents,
            context,
            tools,
            router,
            retry: RetryPolicy::default(),
            request_timeout: TimeoutConfig::default().request(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on the whole request, retries and streaming included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn context(&self) -> &HybridContextStore<D, C> {
        &self.context
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Run a request to completion and return the full reply.
    pub async fn chat(
        self: &Arc<Self>,
        ctx: RequestContext,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let agent_id = request.agent_id;
        let mut stream = self.chat_stream(ctx, request);
        let mut response = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::TextDelta { text } => response.push_str(&text),
                ChatEvent::Done {
                    session_id,
                    model_used,
                } => {
                    return Ok(ChatResponse {
                        response,
                        session_id,
                        agent_id,
                        model_used,
                    });
                }
            }
        }
        Err(ChatError::Cancelled)
    }

    /// Start a request and stream its events.
    pub fn chat_stream(self: &Arc<Self>, ctx: RequestContext, request: ChatRequest) -> ChatStream {
        let ctx = ctx.child();
        let guard = ctx.cancellation.clone().drop_guard();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let span = tracing::info_span!(
            "chat.request",
            request_id = %ctx.request_id,
            user_id = %ctx.user_id,
            agent_id = request.agent_id,
            session_id = tracing::field::Empty,
            model = tracing::field::Empty,
        );
        let this = Arc::clone(self);
        tokio::spawn(
            async move {
                let started = Instant::now();
                match this.execute(&ctx, request, &tx).await {
                    Ok(()) => tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Chat request completed"
                    ),
                    Err(e) => {
                        match e.kind() {
                            ErrorKind::Cancelled => tracing::info!("Chat request cancelled"),
                            kind => tracing::warn!(kind = ?kind, error = %e, "Chat request failed"),
                        }
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
            .instrument(span),
        );

        ChatStream { rx, _guard: guard }
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        request: ChatRequest,
        tx: &mpsc::Sender<ChatResult>,
    ) -> Result<(), ChatError> {
        let deadline = Instant::now() + self.request_timeout;
        let user_id = ctx.user_id.as_str();
        let cancel = &ctx.cancellation;

        // Agent lookup, history and tool listing all count against the deadline.
        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            prepared = tokio::time::timeout_at(deadline, self.prepare(user_id, request)) => {
                match prepared {
                    Ok(prepared) => prepared?,
                    Err(_) => {
                        tracing::warn!("Request deadline passed before generation started");
                        return Err(ChatError::Timeout(self.request_timeout));
                    }
                }
            }
        };
        let Prepared {
            model,
            backend,
            session_id,
            generation,
            tools,
        } = prepared;

        let Retried {
            value: (first, mut stream),
            attempts,
        } = self
            .open(&backend, &generation, &tools, cancel, deadline)
            .await?;

        let mut reply = String::new();
        let mut pending = Some(first);
        let end = loop {
            let item = match pending.take() {
                Some(event) => Some(Ok(event)),
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break StreamEnd::Disconnected,
                    _ = tokio::time::sleep_until(deadline) => break StreamEnd::TimedOut,
                    item = stream.next() => item,
                },
            };
            match item {
                Some(Ok(GenerationEvent::TextDelta { text })) => {
                    reply.push_str(&text);
                    if tx.send(Ok(ChatEvent::TextDelta { text })).await.is_err() {
                        break StreamEnd::Disconnected;
                    }
                }
                Some(Ok(GenerationEvent::ToolCall { name })) => {
                    tracing::debug!(tool = %name, "Backend running tool");
                }
                Some(Ok(GenerationEvent::Done)) => break StreamEnd::Completed,
                Some(Err(e)) => break StreamEnd::Failed(e),
                None => {
                    break StreamEnd::Failed(LlmError::Stream(
                        "stream ended without a completion marker".to_string(),
                    ));
                }
            }
        };

        match end {
            StreamEnd::Completed => {
                self.commit_reply(&session_id, user_id, &reply).await?;
                let _ = tx
                    .send(Ok(ChatEvent::Done {
                        session_id,
                        model_used: model,
                    }))
                    .await;
                Ok(())
            }
            StreamEnd::Failed(error) => {
                let class = classify(&error);
                tracing::error!(
                    class = %class,
                    error = %error,
                    delivered = reply.len(),
                    "Generation failed mid-stream"
                );
                Err(ChatError::GenerationFailed {
                    model,
                    attempts,
                    class,
                    source: error,
                })
            }
            StreamEnd::Disconnected => {
                if !backend.supports_cancellation() {
                    tracing::info!(
                        backend = backend.name(),
                        "Caller disconnected, finishing generation in background"
                    );
                    if let Err(e) = drain(&mut stream, &mut reply, deadline).await {
                        tracing::warn!(error = %e, "Background generation did not finish");
                    }
                }
                if let Err(e) = self.commit_reply(&session_id, user_id, &reply).await {
                    tracing::warn!(error = %e, "Failed to commit partial reply");
                }
                Err(ChatError::Cancelled)
            }
            StreamEnd::TimedOut => {
                if let Err(e) = self.commit_reply(&session_id, user_id, &reply).await {
                    tracing::warn!(error = %e, "Failed to commit partial reply");
                }
                Err(ChatError::Timeout(self.request_timeout))
            }
        }
    }

    /// Everything before generation: agent, route, session, history, tools,
    /// and the committed user turn.
    async fn prepare(&self, user_id: &str, request: ChatRequest) -> Result<Prepared, ChatError> {
        let agent = self
            .agents
            .get(request.agent_id, user_id)
            .await
            .map_err(|e| ChatError::AgentStoreUnavailable(e.to_string()))?
            .ok_or(ChatError::AgentNotFound {
                agent_id: request.agent_id,
            })?;

        // Route before touching the store so an unknown model has no side effects.
        let model = request
            .requested_model()
            .unwrap_or(agent.model.as_str())
            .to_string();
        let backend = self.router.route(&model)?;
        let span = tracing::Span::current();
        span.record("model", model.as_str());

        let session = self
            .context
            .get_or_create_session(request.requested_session(), user_id, agent.agent_id)
            .await?;
        let session_id = session.session_id;
        span.record("session_id", session_id.as_str());

        let history = self
            .context
            .get_history(
                &session_id,
                user_id,
                Some(self.context.config().history_limit),
            )
            .await?;
        let resolution = self.tools.resolve(&agent.tool_names, user_id).await;

        self.context
            .append_message(&session_id, user_id, MessageRole::User, &request.message)
            .await?;

        let mut messages: Vec<Message> = history
            .into_iter()
            .map(|m| Message {
                role: m.role,
                content: m.content,
            })
            .collect();
        messages.push(Message::user(request.message));
        tracing::debug!(
            history = messages.len() - 1,
            tools = resolution.tools.len(),
            backend = backend.name(),
            "Assembled generation context"
        );

        let generation = GenerationRequest {
            model: model.clone(),
            messages,
            system: Some(agent.instruction).filter(|s| !s.trim().is_empty()),
            tools: resolution.tools.specs(),
            max_tokens: None,
            temperature: None,
        };

        Ok(Prepared {
            model,
            backend,
            session_id,
            generation,
            tools: resolution.tools,
        })
    }

    /// Open the backend stream under the retry policy and the request deadline.
    ///
    /// A backend without a cancellation hook is not raced against `cancel`,
    /// so a disconnect before its first event still leaves a stream to drain.
    async fn open(
        &self,
        backend: &Arc<dyn GenerationBackend>,
        generation: &GenerationRequest,
        tools: &ResolvedTools,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Retried<(GenerationEvent, GenerationStream)>, ChatError> {
        let open_attempt = |attempt: u32| {
            tracing::debug!(backend = backend.name(), attempt, "Opening generation stream");
            prime(backend.generate(generation.clone(), tools.clone(), cancel.clone()))
        };

        let detached = CancellationToken::new();
        let retry_cancel = if backend.supports_cancellation() {
            cancel
        } else {
            &detached
        };
        let result = tokio::select! {
            result = self.retry.run(retry_cancel, open_attempt) => result,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ChatError::Timeout(self.request_timeout));
            }
        };

        result.map_err(|failure| {
            if matches!(failure.error, LlmError::Cancelled) && cancel.is_cancelled() {
                return ChatError::Cancelled;
            }
            tracing::error!(
                backend = backend.name(),
                attempts = failure.attempts,
                class = %failure.class,
                error = %failure.error,
                "Generation failed"
            );
            ChatError::GenerationFailed {
                model: generation.model.clone(),
                attempts: failure.attempts,
                class: failure.class,
                source: failure.error,
            }
        })
    }

    async fn commit_reply(&self, session_id: &str, user_id: &str, reply: &str) -> Result<(), ChatError> {
        if reply.is_empty() {
            tracing::debug!("Empty reply, nothing to commit");
            return Ok(());
        }
        self.context
            .append_message(session_id, user_id, MessageRole::Assistant, reply)
            .await?;
        Ok(())
    }
}

/// Read a stream to its end without forwarding anything.
async fn drain(
    stream: &mut GenerationStream,
    reply: &mut String,
    deadline: Instant,
) -> Result<(), LlmError> {
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(LlmError::Timeout {
                    timeout_ms: deadline
                        .saturating_duration_since(Instant::now())
                        .as_millis() as u64,
                });
            }
        };
        match item {
            Some(Ok(GenerationEvent::TextDelta { text })) => reply.push_str(&text),
            Some(Ok(GenerationEvent::ToolCall { .. })) => {}
            Some(Ok(GenerationEvent::Done)) | None => return Ok(()),
            Some(Err(e)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};

    use super::*;
    use crate::llm::matcher::ModelMatcher;
    use crate::testing::{agent, FixedTool, MemoryCache, MemoryDurableStore, MockBackend, StaticAgents};
    use crate::tools::{BoxTool, BoxToolConnection, Tool, ToolConnectionProvider};
    use parley_types::agent::AgentConfig;
    use parley_types::config::ContextConfig;
    use parley_types::llm::ErrorClass;
    use parley_types::tool::{RemoteTool, ToolError, ToolSpec};

    type TestOrchestrator = ChatOrchestrator<StaticAgents, MemoryDurableStore, MemoryCache>;

    struct Harness {
        orchestrator: Arc<TestOrchestrator>,
        durable: MemoryDurableStore,
        openai: MockBackend,
        gemini: MockBackend,
    }

    fn openai() -> MockBackend {
        MockBackend::new("openai", ModelMatcher::prefixes(["gpt-"])).with_models(["gpt-4o-mini"])
    }

    fn harness(openai: MockBackend, agents: Vec<AgentConfig>) -> Harness {
        let durable = MemoryDurableStore::new();
        let gemini = MockBackend::new("gemini", ModelMatcher::prefixes(["gemini-"]))
            .with_models(["gemini-2.5-flash"])
            .replying(&["from gemini"]);
        let router = BackendRouter::new()
            .with_backend(Arc::new(gemini.clone()))
            .with_backend(Arc::new(openai.clone()));

        let mut tools = ToolRegistry::new(Duration::from_secs(300));
        tools.register_static(BoxTool::new(FixedTool {
            name: "current_time",
            output: json!({"now": "2026-01-01T00:00:00Z"}),
        }));

        let context = HybridContextStore::new(
            durable.clone(),
            MemoryCache::new(),
            ContextConfig {
                max_messages: 50,
                history_limit: 20,
                cache_ttl_secs: 1800,
            },
        );
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_network_retries: 1,
            attempt_timeout: Duration::from_secs(5),
        };
        let orchestrator = ChatOrchestrator::new(StaticAgents::new(agents), context, tools, router)
            .with_retry(retry);

        Harness {
            orchestrator: Arc::new(orchestrator),
            durable,
            openai,
            gemini,
        }
    }

    fn default_harness(openai: MockBackend) -> Harness {
        let mut config = agent(1, "gpt-4o-mini");
        config.instruction = "Be brief.".to_string();
        harness(openai, vec![config])
    }

    fn alice() -> RequestContext {
        RequestContext::new("alice")
    }

    async fn wait_for_messages(durable: &MemoryDurableStore, count: usize) {
        for _ in 0..100 {
            if durable.message_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} messages, found {}", durable.message_count());
    }

    #[tokio::test]
    async fn test_first_chat_creates_session_and_second_sees_history() {
        let h = default_harness(openai().replying(&["Hi", " there"]));

        let first = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hello"))
            .await
            .unwrap();
        assert_eq!(first.response, "Hi there");
        assert!(!first.session_id.is_empty());
        assert_eq!(first.agent_id, 1);
        assert_eq!(first.model_used, "gpt-4o-mini");

        let second = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "again").in_session(&first.session_id))
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);

        let requests = h.openai.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages, vec![Message::user("hello")]);
        assert_eq!(
            requests[1].messages,
            vec![
                Message::user("hello"),
                Message::assistant("Hi there"),
                Message::user("again"),
            ]
        );
        assert_eq!(requests[1].system.as_deref(), Some("Be brief."));
        assert_eq!(h.durable.message_count(), 4);
    }

    #[tokio::test]
    async fn test_stream_emits_fragments_then_done() {
        let h = default_harness(openai().replying(&["a", "b", "c"]));
        let events: Vec<ChatEvent> = h
            .orchestrator
            .chat_stream(alice(), ChatRequest::new(1, "go"))
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ChatEvent::TextDelta { text: "a".into() });
        assert_eq!(events[2], ChatEvent::TextDelta { text: "c".into() });
        let ChatEvent::Done { session_id, model_used } = &events[3] else {
            panic!("last event should be Done, got {:?}", events[3]);
        };
        assert!(!session_id.is_empty());
        assert_eq!(model_used, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let h = default_harness(openai());
        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(42, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AgentNotFound { agent_id: 42 }));
        assert_eq!(h.durable.session_count(), 0);
    }

    #[tokio::test]
    async fn test_agent_owned_by_someone_else_is_not_found() {
        let mut private = agent(7, "gpt-4o-mini");
        private.owner_id = Some("bob".to_string());
        let h = harness(openai(), vec![private]);
        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(7, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentNotFound);
    }

    #[tokio::test]
    async fn test_agent_store_failure() {
        let h = default_harness(openai());
        let agents = StaticAgents::new(vec![agent(1, "gpt-4o-mini")]);
        agents.fail(true);
        let orchestrator = Arc::new(ChatOrchestrator::new(
            agents,
            HybridContextStore::new(h.durable.clone(), MemoryCache::new(), ContextConfig::default()),
            ToolRegistry::new(Duration::from_secs(60)),
            BackendRouter::new().with_backend(Arc::new(h.openai.clone())),
        ));
        let err = orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentStoreUnavailable);
    }

    #[tokio::test]
    async fn test_unsupported_model_fails_without_side_effects() {
        let h = default_harness(openai());
        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi").with_model("unknown-model-xyz"))
            .await
            .unwrap_err();

        let ChatError::UnsupportedModel { supported, .. } = &err else {
            panic!("expected UnsupportedModel, got {err:?}");
        };
        assert_eq!(supported["openai"], vec!["gpt-4o-mini"]);
        assert_eq!(supported["gemini"], vec!["gemini-2.5-flash"]);
        assert_eq!(h.durable.session_count(), 0);
        assert_eq!(h.openai.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_override_routes_to_other_backend() {
        let h = default_harness(openai());
        let response = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi").with_model("gemini-2.5-flash"))
            .await
            .unwrap();
        assert_eq!(response.response, "from gemini");
        assert_eq!(response.model_used, "gemini-2.5-flash");
        assert_eq!(h.gemini.calls(), 1);
        assert_eq!(h.openai.calls(), 0);
        assert_eq!(h.gemini.requests()[0].model, "gemini-2.5-flash");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overloads_are_retried_transparently() {
        let backend = openai().replying(&["finally"]);
        backend.push_failure(LlmError::Overloaded("busy".into()));
        backend.push_failure(LlmError::RateLimited { retry_after_ms: None });
        let h = default_harness(backend);

        let response = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap();
        assert_eq!(response.response, "finally");
        assert_eq!(h.openai.calls(), 3);
        assert_eq!(h.durable.message_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_user_turn_only() {
        let backend = openai();
        backend.push_failure(LlmError::AuthenticationFailed);
        let h = default_harness(backend);

        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(err.to_string().contains("model_override"));
        assert_eq!(h.openai.calls(), 1);

        let stored = h.durable.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_commits_nothing() {
        let backend = openai();
        backend.push_script(vec![
            Ok(GenerationEvent::TextDelta {
                text: "partial".into(),
            }),
            Err(LlmError::Network("connection reset".into())),
        ]);
        let h = default_harness(backend);

        let mut stream = h.orchestrator.chat_stream(alice(), ChatRequest::new(1, "hi"));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ChatEvent::TextDelta { text: "partial".into() });
        let err = stream.next().await.unwrap().unwrap_err();
        let ChatError::GenerationFailed { class, attempts, .. } = err else {
            panic!("expected GenerationFailed, got {err:?}");
        };
        assert_eq!(class, ErrorClass::RetryableNetwork);
        assert_eq!(attempts, 1);
        assert!(stream.next().await.is_none());

        // No retry once text has been delivered.
        assert_eq!(h.openai.calls(), 1);
        assert_eq!(h.durable.message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_commits_partial_reply() {
        let backend = openai()
            .replying(&["one", " two", " three"])
            .with_fragment_delay(Duration::from_secs(1));
        let h = default_harness(backend);

        let mut stream = h.orchestrator.chat_stream(alice(), ChatRequest::new(1, "hi"));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ChatEvent::TextDelta { text: "one".into() });
        drop(stream);

        wait_for_messages(&h.durable, 2).await;
        let stored = h.durable.messages();
        assert_eq!(stored[1].role, MessageRole::Assistant);
        assert_eq!(stored[1].content, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_cancellable_backend_finishes_in_background() {
        let backend = openai()
            .replying(&["one", " two", " three"])
            .with_fragment_delay(Duration::from_secs(1))
            .non_cancellable();
        let h = default_harness(backend);

        let mut stream = h.orchestrator.chat_stream(alice(), ChatRequest::new(1, "hi"));
        stream.next().await.unwrap().unwrap();
        drop(stream);

        wait_for_messages(&h.durable, 2).await;
        assert_eq!(h.durable.messages()[1].content, "one two three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_token_stops_request() {
        let backend = openai()
            .replying(&["one", " two"])
            .with_fragment_delay(Duration::from_secs(1));
        let h = default_harness(backend);

        let ctx = alice();
        let mut stream = h.orchestrator.chat_stream(ctx.clone(), ChatRequest::new(1, "hi"));
        stream.next().await.unwrap().unwrap();
        ctx.cancel();

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(h.durable.messages()[1].content, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_commits_partial_reply() {
        let backend = openai()
            .replying(&["a", "b", "c"])
            .with_fragment_delay(Duration::from_secs(10));
        let mut h = default_harness(backend);
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_request_timeout(Duration::from_secs(15));
        h.orchestrator = Arc::new(orchestrator);

        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Timeout(d) if d == Duration::from_secs(15)));

        let stored = h.durable.messages();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "ab");
    }

    #[tokio::test]
    async fn test_tools_resolved_best_effort() {
        let mut config = agent(1, "gpt-4o-mini");
        config.tool_names = vec!["current_time".to_string(), "ghost_tool".to_string()];
        let h = harness(openai(), vec![config]);

        h.orchestrator
            .chat(alice(), ChatRequest::new(1, "what time is it"))
            .await
            .unwrap();

        assert_eq!(h.openai.tool_sets(), vec![vec!["current_time".to_string()]]);
        let advertised: Vec<String> = h.openai.requests()[0]
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(advertised, vec!["current_time"]);
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_committed() {
        let backend = openai();
        backend.push_script(vec![Ok(GenerationEvent::Done)]);
        let h = default_harness(backend);

        let response = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap();
        assert_eq!(response.response, "");
        assert_eq!(h.durable.message_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_session_is_rejected() {
        let h = default_harness(openai());
        let first = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hello"))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .chat(
                RequestContext::new("mallory"),
                ChatRequest::new(1, "let me in").in_session(&first.session_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::SessionOwnership { .. }));
        assert_eq!(h.openai.calls(), 1);
    }

    #[tokio::test]
    async fn test_durable_outage_fails_request() {
        let h = default_harness(openai());
        h.durable.fail_writes(true);
        let err = h
            .orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionStoreUnavailable);
        assert_eq!(h.openai.calls(), 0);
    }

    /// Tool whose side effect is counted.
    struct CountingTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Tool for CountingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.to_string(),
                description: "counts invocations".to_string(),
                parameters_schema: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"created": true}))
        }
    }

    /// Gateway that never answers a listing.
    struct HangingConnection;

    impl ToolConnectionProvider for HangingConnection {
        async fn list_tools(&self, _provider: &str, _user_id: &str) -> Result<Vec<RemoteTool>, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn invoke(
            &self,
            _provider: &str,
            _user_id: &str,
            tool_name: &str,
            _args: Value,
        ) -> Result<Value, ToolError> {
            Err(ToolError::NotFound(tool_name.to_string()))
        }
    }

    fn orchestrator_with_tools(
        backend: &MockBackend,
        durable: &MemoryDurableStore,
        tools: ToolRegistry,
        tool_names: &[&str],
    ) -> Arc<TestOrchestrator> {
        let mut config = agent(1, "gpt-4o-mini");
        config.tool_names = tool_names.iter().map(|s| s.to_string()).collect();
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_network_retries: 1,
            attempt_timeout: Duration::from_secs(5),
        };
        Arc::new(
            ChatOrchestrator::new(
                StaticAgents::new(vec![config]),
                HybridContextStore::new(durable.clone(), MemoryCache::new(), ContextConfig::default()),
                tools,
                BackendRouter::new().with_backend(Arc::new(backend.clone())),
            )
            .with_retry(retry)
            .with_request_timeout(Duration::from_secs(5)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_covers_tool_listing() {
        let backend = openai();
        let durable = MemoryDurableStore::new();
        let tools = ToolRegistry::new(Duration::from_secs(300))
            .with_connection(BoxToolConnection::new(HangingConnection), ["slow"]);
        let orchestrator = orchestrator_with_tools(&backend, &durable, tools, &["slow_search"]);

        let started = Instant::now();
        let err = orchestrator
            .chat(alice(), ChatRequest::new(1, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(backend.calls(), 0);
        assert_eq!(durable.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_tool_call_is_not_retried() {
        let backend = openai().calling_tool("create_issue");
        backend.push_failure(LlmError::Overloaded("busy".into()));
        let durable = MemoryDurableStore::new();
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new(Duration::from_secs(300));
        tools.register_static(BoxTool::new(CountingTool {
            name: "create_issue",
            calls: Arc::clone(&invocations),
        }));
        let orchestrator = orchestrator_with_tools(&backend, &durable, tools, &["create_issue"]);

        let err = orchestrator
            .chat(alice(), ChatRequest::new(1, "file a bug"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::GenerationFailed {
                attempts: 1,
                class: ErrorClass::RetryableOverload,
                ..
            }
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), 1);
        assert_eq!(durable.message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_first_event_drains_non_cancellable_backend() {
        let backend = openai()
            .replying(&["late", " reply"])
            .with_first_event_delay(Duration::from_secs(2))
            .non_cancellable();
        let h = default_harness(backend);

        let stream = h.orchestrator.chat_stream(alice(), ChatRequest::new(1, "hi"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(stream);

        wait_for_messages(&h.durable, 2).await;
        let stored = h.durable.messages();
        assert_eq!(stored[0].content, "hi");
        assert_eq!(stored[1].content, "late reply");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_first_event_stops_cancellable_backend() {
        let backend = openai()
            .replying(&["never"])
            .with_first_event_delay(Duration::from_secs(2));
        let h = default_harness(backend);

        let stream = h.orchestrator.chat_stream(alice(), ChatRequest::new(1, "hi"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(stream);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let stored = h.durable.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi");
    }
}
