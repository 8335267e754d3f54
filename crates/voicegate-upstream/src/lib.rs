//! Gemini Live channel adapter.
//!
//! Implements [`voicegate_core::UpstreamPort`] over the Vertex AI
//! `BidiGenerateContent` bidirectional WebSocket:
//!
//! 1. **Initialize** — bearer credential from the default chain
//! 2. **Connect** — open the WebSocket (≤ 60 s)
//! 3. **Setup** — one-shot session frame, wait for the acknowledgement (≤ 30 s)
//! 4. **Stream** — audio/text turns out, typed [`UpstreamEvent`]s in
//! 5. **Close** — stop keepalive, close the channel
//!
//! The server delivers JSON control messages in both Text and Binary frames;
//! both are parsed. Audio parts are dropped at the parser boundary while the
//! session's forward gate is closed, so suppressed chunks never reach the
//! coordinator.
//!
//! [`UpstreamEvent`]: voicegate_core::UpstreamEvent

pub mod client;
pub mod credentials;
pub mod parse;
pub mod setup;

pub use client::{LiveSession, live_session_factory};
