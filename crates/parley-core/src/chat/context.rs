//! Per-request context threaded through the chat lifecycle.
//!
//! `RequestContext` carries the caller identity and the cancellation token
//! explicitly; nothing about a request is kept in ambient state.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for log correlation.
    pub request_id: Uuid,
    /// Authenticated caller. Every session and tool lookup is scoped by it.
    pub user_id: String,
    /// Cancelled when the caller goes away.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            user_id: user_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one tied to a transport connection.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A context for work spawned on behalf of this request. Cancelling the
    /// parent cancels the child, not the other way round.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            user_id: self.user_id.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}
