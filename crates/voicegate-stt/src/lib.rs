//! Fallback speech-to-text path.
//!
//! When the upstream model does not return user transcripts (or has not
//! proven that it will yet), the gateway tees microphone audio into an
//! independent streaming recognizer. [`FallbackAsr`] supervises the stream:
//! exponential-backoff reconnects up to a retry cap, cancellation on session
//! teardown, and a terminal "disabled" notice once retries are exhausted.
//! A fallback failure is never fatal to the session.

pub mod fallback;
pub mod recognizer;

pub use fallback::{AsrUpdate, FallbackAsr};
pub use recognizer::{WsRecognizer, ws_recognizer_factory};
