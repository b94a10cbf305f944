//! Static tool trait and its object-safe wrapper.
//!
//! Follows the same blanket-impl pattern as `BoxToolConnection`:
//! 1. Define an object-safe `ToolDyn` trait with boxed futures
//! 2. Blanket-impl `ToolDyn` for all `T: Tool`
//! 3. `BoxTool` wraps `Box<dyn ToolDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use parley_types::tool::{ToolError, ToolSpec};

/// A built-in tool registered once at startup.
///
/// Implementations live in parley-infra (e.g., `CurrentTimeTool`).
pub trait Tool: Send + Sync {
    /// Description handed to backends. `spec().name` is the registration name.
    fn spec(&self) -> ToolSpec;

    fn invoke(&self, args: Value) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

/// Object-safe version of [`Tool`] with boxed futures.
pub trait ToolDyn: Send + Sync {
    fn spec(&self) -> ToolSpec;

    fn invoke_boxed(&self, args: Value)
    -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn spec(&self) -> ToolSpec {
        Tool::spec(self)
    }

    fn invoke_boxed(
        &self,
        args: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(self.invoke(args))
    }
}

/// Type-erased static tool.
pub struct BoxTool {
    inner: Box<dyn ToolDyn>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn spec(&self) -> ToolSpec {
        self.inner.spec()
    }

    pub async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        self.inner.invoke_boxed(args).await
    }
}
