/// Failures that cross API boundaries.
///
/// Routing misses and malformed inbound data are not represented here: the
/// relay drops both silently, since a sender cannot know whether a receiver
/// is registered yet and inbound channels are untrusted.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl RelayError {
    /// Whether the surrounding context can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Serialization(_) | Self::HandshakeRejected(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::HandshakeRejected(_) => "handshake_rejected",
        }
    }
}
