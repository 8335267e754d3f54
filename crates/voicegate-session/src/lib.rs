//! Per-session coordination for the voicegate gateway.
//!
//! One [`SessionCoordinator`] per client connection. It is the sole owner of
//! session state: every task that touches the session (socket reader,
//! upstream RX forwarder, fallback recognizer supervisor) communicates by
//! sending [`SessionInput`]s into the coordinator's inbox, and the
//! coordinator is the single consumer. State transitions are therefore
//! sequential and lock-free.
//!
//! Outbound traffic leaves through a bounded [`ServerEvent`] queue whose
//! single consumer — the socket writer — mints the per-session sequence
//! numbers via [`SequencedWriter`].
//!
//! [`ServerEvent`]: voicegate_core::ServerEvent

pub mod coordinator;
pub mod translator;

pub use coordinator::{SessionCoordinator, SessionInput};
pub use translator::{EventTranslator, SequencedWriter};
