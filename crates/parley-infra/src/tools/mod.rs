//! Tool adapters: built-in tools and the HTTP tool-gateway connection.

pub mod builtin;
pub mod http;

pub use builtin::CurrentTimeTool;
pub use http::HttpToolConnectionProvider;
