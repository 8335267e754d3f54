//! Gateway error types.

use std::time::Duration;

/// Errors from the upstream model channel.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Could not acquire a bearer credential for the upstream service.
    #[error("Upstream credential acquisition failed: {0}")]
    Auth(String),

    /// The channel opened but session setup was rejected or the channel
    /// closed before setup completed.
    #[error("Upstream setup failed: {0}")]
    Setup(String),

    /// Setup did not complete within the allowed window.
    #[error("Upstream setup timed out after {0:?}")]
    SetupTimeout(Duration),

    /// Send or receive failure after setup.
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// An operation was attempted on a closed channel.
    #[error("Upstream channel is closed")]
    ChannelClosed,
}

/// Errors from the fallback speech recognizer. Never fatal to a session.
#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    /// Could not open the recognizer stream.
    #[error("Recognizer connect failed: {0}")]
    Connect(String),

    /// The stream failed mid-flight.
    #[error("Recognizer stream error: {0}")]
    Stream(String),

    /// The stream closed while the session still wanted transcripts.
    #[error("Recognizer stream closed")]
    Closed,
}

/// Session-level errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bearer token rejected by the identity verifier. Fatal for the session.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Any upstream channel failure.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Fallback recognizer failure; the session continues without it.
    #[error(transparent)]
    Asr(#[from] AsrError),

    /// A client text frame that is not valid protocol JSON. Dropped.
    #[error("Malformed client message: {0}")]
    MalformedClientMessage(String),

    /// Audio arrived before the session was ready for it. Dropped.
    #[error("Audio rejected: {reason}")]
    AudioRejected { reason: &'static str },

    /// Unexpected internal failure. Surfaced with a generic message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Startup configuration errors. Fatal for the process (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),

    /// A variable is present but unparseable.
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
