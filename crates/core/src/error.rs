/// Domain error for the analysis engine.
///
/// `InvalidInput` and `ServiceUnavailable` must stay distinct: the API layer
/// maps them to different status codes and remediation messages.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Unreadable video, no decodable frames, unusable sensor CSV, or
    /// invalid analysis options.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A required detection asset or executable is not available.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any other failure while processing.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            CoreError::InvalidInput(msg)
            | CoreError::ServiceUnavailable(msg)
            | CoreError::Internal(msg) => msg,
        }
    }
}
