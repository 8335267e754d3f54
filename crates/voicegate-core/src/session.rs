//! Session state, counters, and end-of-session metrics.

use serde::Serialize;

/// Internal coordinator state machine.
///
/// ```text
///   connecting ─▶ authenticating ─▶ upstream_starting ─▶ ready ─▶ listening ⇄ speaking
///                      │                    │                          │
///                      ▼                    ▼                          ▼
///                   errored              errored                    stopping ─▶ closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    UpstreamStarting,
    Ready,
    Listening,
    Speaking,
    Stopping,
    Closed,
    Errored,
}

impl SessionState {
    /// Terminal states accept no further input.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// Which transcript pipeline currently speaks for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TranscriptSource {
    /// The fallback streaming recognizer.
    #[serde(rename = "stt")]
    Stt,
    /// The upstream model's own input transcription.
    #[serde(rename = "vertex")]
    Vertex,
}

impl TranscriptSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Vertex => "vertex",
        }
    }
}

/// A user or assistant transcript segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_partial: bool,
    pub source: TranscriptSource,
}

/// Per-session traffic counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionCounters {
    pub in_audio_bytes: u64,
    pub out_audio_chunks: u64,
    pub vertex_partials: u64,
    pub vertex_finals: u64,
    pub stt_partials: u64,
    pub stt_finals: u64,
    pub red_flags: u64,
}

/// Red-flag detections broken down by the source that carried the transcript.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EmergencyDetections {
    pub vertex: u64,
    pub stt: u64,
}

/// Snapshot logged when a session ends. Contains counts only — never content.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    #[serde(flatten)]
    pub counters: SessionCounters,
    pub stt_retry_count: u32,
    pub transcript_source: TranscriptSource,
    pub emergency_detections: EmergencyDetections,
}
