//! Tool resolution: static built-ins plus per-connection dynamic tools.

pub mod connection;
pub mod naming;
pub mod registry;
pub mod tool;

pub use connection::{BoxToolConnection, ToolConnectionProvider};
pub use registry::{ResolvedTools, ToolDescriptor, ToolRegistry, ToolResolution};
pub use tool::{BoxTool, Tool};
