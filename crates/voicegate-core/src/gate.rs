//! Forward gate — suppresses model audio after a barge-in.
//!
//! When the user interrupts the assistant mid-turn, model audio that is still
//! arriving from the upstream channel must not reach the client. The gate is
//! a shared atomic flag: the coordinator disables it on barge-in (or when
//! `cancel_output` runs) and re-enables it when the next turn-complete is
//! forwarded upstream. The upstream RX path drops audio parts while the gate
//! is disabled, so suppressed chunks never enter the outbound queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared gate that coordinates model-audio forwarding.
///
/// Cloning shares the underlying flag; the coordinator and the upstream
/// session observe the same state.
#[derive(Debug, Clone)]
pub struct ForwardGate {
    enabled: Arc<AtomicBool>,
}

impl ForwardGate {
    /// Create a new gate (forwarding initially enabled).
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Allow model audio through to the client.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::debug!("Forward gate: open — model audio flows");
    }

    /// Suppress model audio until the next turn boundary.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::debug!("Forward gate: closed — model audio suppressed");
    }

    /// Whether model audio is currently forwarded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Default for ForwardGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_enabled() {
        let gate = ForwardGate::new();
        assert!(gate.is_enabled());
    }

    #[test]
    fn gate_disable_enable() {
        let gate = ForwardGate::new();

        gate.disable();
        assert!(!gate.is_enabled());

        gate.enable();
        assert!(gate.is_enabled());
    }

    #[test]
    fn gate_clone_shares_state() {
        let gate1 = ForwardGate::new();
        let gate2 = gate1.clone();

        gate1.disable();
        assert!(!gate2.is_enabled());

        gate2.enable();
        assert!(gate1.is_enabled());
    }

    #[test]
    fn gate_disable_is_idempotent() {
        let gate = ForwardGate::new();
        gate.disable();
        gate.disable();
        assert!(!gate.is_enabled());
    }
}
