//! HTTP failure mapping shared by the backends.
//!
//! Statuses and transport faults are translated into the [`LlmError`]
//! variants the retry layer classifies on.

use parley_types::llm::LlmError;

/// Map a non-success HTTP status to a backend error.
pub(crate) fn error_for_status(status: u16, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited {
            retry_after_ms: None,
        },
        503 | 529 => LlmError::Overloaded(message),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        _ => LlmError::Provider { message },
    }
}

/// Map a transport-level reqwest failure.
///
/// Connection and timeout faults become [`LlmError::Network`] so they are
/// retried once; a status carried by the error is mapped like a response.
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> LlmError {
    if let Some(status) = err.status() {
        return error_for_status(status.as_u16(), err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return LlmError::Network(err.to_string());
    }
    if err.is_decode() {
        return LlmError::Deserialization(err.to_string());
    }
    LlmError::Provider {
        message: format!("HTTP request failed: {err}"),
    }
}
