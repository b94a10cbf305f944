//! External tool connections.
//!
//! A connection lists and invokes the tools a user has connected under a
//! provider (e.g. "tavily", "github"). The engine receives one
//! `ToolConnectionProvider` by injection and scopes every call by `user_id`;
//! nothing here holds per-user state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use parley_types::tool::{RemoteTool, ToolError};

/// Port for listing and invoking dynamically discovered tools.
///
/// Implementations live in parley-infra (e.g., `HttpToolConnectionProvider`).
pub trait ToolConnectionProvider: Send + Sync {
    /// Tools currently available to `user_id` under `provider`.
    fn list_tools(
        &self,
        provider: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<RemoteTool>, ToolError>> + Send;

    /// Invoke a tool by the raw name its connection listed.
    fn invoke(
        &self,
        provider: &str,
        user_id: &str,
        tool_name: &str,
        args: Value,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`ToolConnectionProvider`] with boxed futures.
pub trait ToolConnectionDyn: Send + Sync {
    fn list_tools_boxed<'a>(
        &'a self,
        provider: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteTool>, ToolError>>;

    fn invoke_boxed<'a>(
        &'a self,
        provider: &'a str,
        user_id: &'a str,
        tool_name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, ToolError>>;
}

impl<T: ToolConnectionProvider> ToolConnectionDyn for T {
    fn list_tools_boxed<'a>(
        &'a self,
        provider: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteTool>, ToolError>> {
        Box::pin(self.list_tools(provider, user_id))
    }

    fn invoke_boxed<'a>(
        &'a self,
        provider: &'a str,
        user_id: &'a str,
        tool_name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(self.invoke(provider, user_id, tool_name, args))
    }
}

/// Type-erased connection provider.
///
/// Backed by an `Arc` so resolved tool sets can carry it into backend
/// streams that outlive the registry borrow.
#[derive(Clone)]
pub struct BoxToolConnection {
    inner: Arc<dyn ToolConnectionDyn>,
}

impl BoxToolConnection {
    pub fn new<T: ToolConnectionProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    pub async fn list_tools(
        &self,
        provider: &str,
        user_id: &str,
    ) -> Result<Vec<RemoteTool>, ToolError> {
        self.inner.list_tools_boxed(provider, user_id).await
    }

    pub async fn invoke(
        &self,
        provider: &str,
        user_id: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        self.inner
            .invoke_boxed(provider, user_id, tool_name, args)
            .await
    }
}
