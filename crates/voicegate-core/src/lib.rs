//! Domain core for the voicegate session gateway.
//!
//! Everything in this crate is transport-agnostic: client protocol frames,
//! server event catalogue, session state and counters, the red-flag safety
//! scanner, configuration, the PHI-redacting logger, and the port traits the
//! adapter crates (`voicegate-upstream`, `voicegate-stt`, `voicegate-axum`)
//! implement or consume.

pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod ports;
pub mod protocol;
pub mod safety;
pub mod session;

// Re-export key types for convenience
pub use config::{AllowedOrigins, RunMode, Settings, SttSettings, VertexSettings};
pub use error::{AsrError, ConfigError, GatewayError, UpstreamError};
pub use gate::ForwardGate;
pub use identity::{IdentityVerifier, MockTokenVerifier, VerifiedIdentity};
pub use ports::{
    RecognizerEvent, RecognizerFactory, StreamingRecognizer, UpstreamEvent, UpstreamFactory,
    UpstreamPort,
};
pub use protocol::{ClientSessionState, InboundFrame, KpiKind, ServerEvent};
pub use safety::{SafetyVerdict, Severity, scan_transcript};
pub use session::{
    EmergencyDetections, SessionCounters, SessionMetrics, SessionState, Transcript,
    TranscriptSource,
};
