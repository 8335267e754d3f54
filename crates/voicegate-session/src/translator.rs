//! Event translation policy and outbound sequencing.
//!
//! [`EventTranslator`] maps internal happenings onto the client protocol:
//! the assistant-partials policy (finals always, partials only when
//! configured), base64 audio encoding, and duplicate-state suppression.
//! [`SequencedWriter`] is owned by the socket writer task — the only place
//! sequence numbers are minted, which is what makes them strictly monotonic.

use base64::Engine;

use voicegate_core::protocol::{ClientSessionState, ServerEvent};

/// Stateless-ish mapping from internal events to `server.*` frames.
#[derive(Debug)]
pub struct EventTranslator {
    emit_partials: bool,
    last_state: Option<ClientSessionState>,
}

impl EventTranslator {
    #[must_use]
    pub const fn new(emit_partials: bool) -> Self {
        Self {
            emit_partials,
            last_state: None,
        }
    }

    /// Assistant transcript policy: finals always become
    /// `server.transcript.final`; partials only pass when configured.
    #[must_use]
    pub fn assistant_transcript(&self, text: String, is_partial: bool) -> Option<ServerEvent> {
        if is_partial {
            self.emit_partials
                .then_some(ServerEvent::TranscriptPartial { text })
        } else {
            Some(ServerEvent::TranscriptFinal { text })
        }
    }

    /// Model audio chunk (PCM16 LE 24 kHz) as a base64 `server.audio.out`.
    #[must_use]
    pub fn model_audio(&self, pcm: &[u8]) -> ServerEvent {
        ServerEvent::AudioOut {
            data: base64::engine::general_purpose::STANDARD.encode(pcm),
        }
    }

    /// Duplicate-state suppression: a state event is produced only when the
    /// value changes.
    pub fn session_state(&mut self, state: ClientSessionState) -> Option<ServerEvent> {
        if self.last_state == Some(state) {
            return None;
        }
        self.last_state = Some(state);
        Some(ServerEvent::SessionState(state))
    }

    /// The last state the client was told about.
    #[must_use]
    pub const fn last_state(&self) -> Option<ClientSessionState> {
        self.last_state
    }
}

/// Mints `seq` and serializes frames. One per session, owned by the writer.
#[derive(Debug)]
pub struct SequencedWriter {
    next_seq: u64,
}

impl SequencedWriter {
    /// Sequence numbers start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next_seq: 1 }
    }

    /// Wrap an event in the next `{type, seq, payload}` frame.
    pub fn frame(&mut self, event: &ServerEvent) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        event.to_frame(seq)
    }

    /// The next sequence number that would be assigned.
    #[must_use]
    pub const fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl Default for SequencedWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn finals_always_pass() {
        let translator = EventTranslator::new(false);
        let event = translator
            .assistant_transcript("Take fluids and rest.".into(), false)
            .unwrap();
        assert!(matches!(event, ServerEvent::TranscriptFinal { .. }));
    }

    #[test]
    fn partials_suppressed_by_default() {
        let translator = EventTranslator::new(false);
        assert!(translator.assistant_transcript("Take".into(), true).is_none());
    }

    #[test]
    fn partials_pass_when_configured() {
        let translator = EventTranslator::new(true);
        let event = translator.assistant_transcript("Take".into(), true).unwrap();
        assert!(matches!(event, ServerEvent::TranscriptPartial { .. }));
    }

    #[test]
    fn repeated_states_are_suppressed() {
        let mut translator = EventTranslator::new(false);
        assert!(translator.session_state(ClientSessionState::Listening).is_some());
        assert!(translator.session_state(ClientSessionState::Listening).is_none());
        assert!(translator.session_state(ClientSessionState::Speaking).is_some());
        assert!(translator.session_state(ClientSessionState::Listening).is_some());
    }

    #[test]
    fn audio_round_trips_base64() {
        let translator = EventTranslator::new(false);
        let event = translator.model_audio(&[1, 2, 3, 4]);
        let ServerEvent::AudioOut { data } = &event else {
            panic!("expected AudioOut");
        };
        let decoded = base64::engine::general_purpose::STANDARD.decode(data).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 4]);
    }

    #[test]
    fn seq_starts_at_one_and_increments() {
        let mut writer = SequencedWriter::new();
        let first = writer.frame(&ServerEvent::SessionState(ClientSessionState::Connecting));
        let second = writer.frame(&ServerEvent::SessionState(ClientSessionState::Ready));

        let first: Value = serde_json::from_str(&first).unwrap();
        let second: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(first["seq"], 1);
        assert_eq!(second["seq"], 2);
        assert_eq!(writer.next_seq(), 3);
    }

    #[test]
    fn seq_is_strictly_monotonic_over_many_frames() {
        let mut writer = SequencedWriter::new();
        let mut last = 0u64;
        for _ in 0..100 {
            let frame = writer.frame(&ServerEvent::Error {
                message: "x".into(),
            });
            let value: Value = serde_json::from_str(&frame).unwrap();
            let seq = value["seq"].as_u64().unwrap();
            assert!(seq > last);
            last = seq;
        }
    }
}
