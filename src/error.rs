use thiserror::Error;

/// Failure taxonomy for the conversation engine.
///
/// Nothing here is fatal to the process: every variant degrades to a
/// retryable user action (re-send, re-open the conversation, sign in again).
#[derive(Debug, Error)]
pub enum EngineError {
    /// No authenticated user where one is needed. Surfaced as a
    /// redirect-to-signin condition, never a crash.
    #[error("authentication required")]
    AuthRequired,

    /// The backing store (or identity collaborator) could not be reached.
    /// Propagated to the caller, never retried internally.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Rejected before any network call (empty body, blank display name,
    /// self-conversation, unknown conversation id).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The reply-generation service failed or returned an unusable payload.
    /// The in-flight bot turn is abandoned, not retried.
    #[error("bot upstream failed: {0}")]
    BotUpstreamFailed(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::UpstreamUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_map_to_upstream_unavailable() {
        let err = EngineError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, EngineError::UpstreamUnavailable(_)));
    }

    #[test]
    fn variants_render_their_context() {
        let err = EngineError::ValidationFailed("message body is empty".to_string());
        assert_eq!(err.to_string(), "validation failed: message body is empty");
        assert_eq!(
            EngineError::AuthRequired.to_string(),
            "authentication required"
        );
    }
}
