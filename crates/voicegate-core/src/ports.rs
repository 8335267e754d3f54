//! Port traits at the seams of the gateway.
//!
//! The coordinator in `voicegate-session` talks only to these traits; the
//! adapter crates provide the real implementations (Gemini Live channel,
//! WebSocket recognizer, HTTP identity verifier). Integration tests
//! substitute scripted mocks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{AsrError, UpstreamError};
use crate::gate::ForwardGate;

// ── Upstream model channel ─────────────────────────────────────────

/// Typed event from the upstream model channel.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Session setup negotiated; the channel is ready for audio.
    Setup,
    /// Assistant transcript segment.
    Transcript { text: String, is_partial: bool },
    /// Transcription of the user's own speech.
    UserTranscript { text: String, is_partial: bool },
    /// Model audio chunk — raw PCM16 LE, 24 kHz, mono.
    Audio(Vec<u8>),
    /// The model observed the user interrupting its output.
    BargeIn,
    /// Structured visit-note draft produced by a tool call.
    DraftUpdate(Value),
    /// Narrative summary produced by a tool call.
    NarrativeUpdate(Value),
    /// Channel-level error after setup.
    Error(String),
    /// The channel closed.
    Closed { code: Option<u16>, reason: String },
}

/// Bidirectional channel to the generative-audio model.
///
/// `start` blocks until setup completes (or fails); events then flow through
/// the returned receiver. Send operations must not be called before `start`
/// has returned successfully — implementations refuse with
/// [`UpstreamError::ChannelClosed`].
#[async_trait]
pub trait UpstreamPort: Send {
    /// Acquire a bearer credential for the channel.
    async fn initialize(&mut self) -> Result<(), UpstreamError>;

    /// Open the channel, send the one-shot setup frame built from
    /// `session_config`, and wait for the setup acknowledgement.
    async fn start(
        &mut self,
        session_config: &Value,
    ) -> Result<mpsc::Receiver<UpstreamEvent>, UpstreamError>;

    /// Ship one user audio chunk (PCM16 LE, 16 kHz, mono).
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError>;

    /// Send a user-role text turn with `turnComplete = true`.
    async fn send_text_turn(&mut self, text: &str) -> Result<(), UpstreamError>;

    /// Send an empty user turn with `turnComplete = true`, optionally
    /// re-opening the audio forward gate.
    async fn send_turn_complete(&mut self, reenable_forwarding: bool)
    -> Result<(), UpstreamError>;

    /// Stop the model's current output: close the forward gate, then send a
    /// turn-complete that leaves it closed. The gate stays closed even when
    /// the send fails.
    async fn cancel_output(&mut self) -> Result<(), UpstreamError>;

    /// Acknowledge a tool call.
    async fn send_function_response(
        &mut self,
        name: &str,
        response: Value,
        call_id: Option<String>,
    ) -> Result<(), UpstreamError>;

    /// Stop keepalive and close the channel. Idempotent.
    async fn close(&mut self);

    /// Whether setup has completed and the channel is open.
    fn is_setup(&self) -> bool;
}

/// Builds one upstream channel per session, sharing the session's forward
/// gate so suppressed audio is dropped at the parser boundary.
pub type UpstreamFactory = Arc<dyn Fn(ForwardGate) -> Box<dyn UpstreamPort> + Send + Sync>;

// ── Fallback speech recognizer ─────────────────────────────────────

/// Event from a streaming speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// A transcript hypothesis or committed segment.
    Transcript { text: String, is_partial: bool },
    /// The stream failed; the supervisor decides whether to retry.
    Error(String),
    /// The stream ended.
    Closed,
}

/// One streaming recognition session.
///
/// Contract: linear PCM16 LE, 16 kHz, mono; interim results enabled;
/// automatic punctuation enabled.
#[async_trait]
pub trait StreamingRecognizer: Send {
    /// Open the stream and return its event receiver.
    async fn open(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>, AsrError>;

    /// Forward one audio chunk. No-op when the stream is not open.
    async fn write(&mut self, pcm: &[u8]) -> Result<(), AsrError>;

    /// Close the stream and release resources.
    async fn finish(&mut self);
}

/// Builds one recognizer stream per (re)connection attempt.
pub type RecognizerFactory = Arc<dyn Fn() -> Box<dyn StreamingRecognizer> + Send + Sync>;
