//! Client wire protocol.
//!
//! ## Frames
//!
//! | Direction | Format | Content |
//! |---|---|---|
//! | Client → Server | Binary | Raw PCM16 LE, 16 kHz, mono |
//! | Client → Server | Text (JSON) | `{type, payload?}` control frames |
//! | Server → Client | Text (JSON) | `{type, seq, payload}` events |
//!
//! Binary frames are the primary audio carrier; the base64 text variant
//! exists only for older clients. `seq` is strictly monotonic per session,
//! starting at 1, and is minted exclusively by the writer task.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::safety::Severity;

// ── Inbound frames ─────────────────────────────────────────────────

/// A parsed client text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `client.hello` — identity handshake plus session configuration.
    Hello {
        token: String,
        session_config: Value,
    },

    /// `client.audio.chunk` / legacy `client.audio.chunk.base64`.
    AudioChunkBase64 { data: String },

    /// `client.audio.turnComplete`.
    TurnComplete,

    /// `client.audio.bargeIn`.
    BargeIn {
        reason: Option<String>,
        timestamp: Option<i64>,
    },

    /// `client.session.stop` / legacy `client.stop`.
    Stop,
}

impl InboundFrame {
    /// Parse a client text frame.
    ///
    /// Unknown types and structurally invalid payloads are
    /// [`GatewayError::MalformedClientMessage`]; the caller logs at warn and
    /// drops the frame.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::MalformedClientMessage(format!("not JSON: {e}")))?;

        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedClientMessage("missing type".into()))?;

        let payload = value.get("payload").cloned().unwrap_or(Value::Null);

        match frame_type {
            "client.hello" => {
                let token = payload
                    .get("firebase_id_token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::MalformedClientMessage("hello without credential".into())
                    })?
                    .to_string();
                let session_config = payload
                    .get("session_config")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                Ok(Self::Hello {
                    token,
                    session_config,
                })
            }
            "client.audio.chunk" | "client.audio.chunk.base64" => {
                let data = payload
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::MalformedClientMessage("audio chunk without data".into())
                    })?
                    .to_string();
                Ok(Self::AudioChunkBase64 { data })
            }
            "client.audio.turnComplete" => Ok(Self::TurnComplete),
            "client.audio.bargeIn" => Ok(Self::BargeIn {
                reason: payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                timestamp: payload.get("timestamp").and_then(Value::as_i64),
            }),
            "client.session.stop" | "client.stop" => Ok(Self::Stop),
            other => Err(GatewayError::MalformedClientMessage(format!(
                "unknown type {other:?}"
            ))),
        }
    }
}

// ── Outbound events ────────────────────────────────────────────────

/// Client-visible session state, a deliberately coarser view than the
/// coordinator's internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSessionState {
    Connecting,
    Ready,
    Listening,
    Speaking,
    Stopped,
    NetworkDegraded,
    Disconnected,
}

impl ClientSessionState {
    /// Wire spelling of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Stopped => "stopped",
            Self::NetworkDegraded => "network_degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Latency KPI markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiKind {
    /// A client `turnComplete` frame was received.
    TurnCompleteReceived,
    /// The first model audio chunk of a turn was forwarded to the client.
    FirstModelAudio,
}

impl KpiKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TurnCompleteReceived => "turnComplete_received",
            Self::FirstModelAudio => "first_model_audio",
        }
    }
}

/// An event on its way to the client. The writer task wraps it with the
/// session's next sequence number.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `server.session.state`
    SessionState(ClientSessionState),
    /// `server.transcript.partial` (assistant)
    TranscriptPartial { text: String },
    /// `server.transcript.final` (assistant)
    TranscriptFinal { text: String },
    /// `server.user.transcript.partial`
    UserTranscriptPartial { text: String },
    /// `server.user.transcript.final`
    UserTranscriptFinal { text: String },
    /// `server.audio.out` — base64 PCM16 LE, 24 kHz, mono
    AudioOut { data: String },
    /// `server.audio.stop`
    AudioStop { reason: String },
    /// `server.audio.bargeInAck`
    BargeInAck { timestamp: i64 },
    /// `server.triage.emergency`
    TriageEmergency { severity: Severity, banner: String },
    /// `server.kpi`
    Kpi { kind: KpiKind, at_ms: i64 },
    /// `server.draft.update` — structured visit-note draft from a tool call
    DraftUpdate { args: Value },
    /// `server.narrative.update` — narrative summary from a tool call
    NarrativeUpdate { args: Value },
    /// `server.error`
    Error { message: String },
}

impl ServerEvent {
    /// Wire `type` of the event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SessionState(_) => "server.session.state",
            Self::TranscriptPartial { .. } => "server.transcript.partial",
            Self::TranscriptFinal { .. } => "server.transcript.final",
            Self::UserTranscriptPartial { .. } => "server.user.transcript.partial",
            Self::UserTranscriptFinal { .. } => "server.user.transcript.final",
            Self::AudioOut { .. } => "server.audio.out",
            Self::AudioStop { .. } => "server.audio.stop",
            Self::BargeInAck { .. } => "server.audio.bargeInAck",
            Self::TriageEmergency { .. } => "server.triage.emergency",
            Self::Kpi { .. } => "server.kpi",
            Self::DraftUpdate { .. } => "server.draft.update",
            Self::NarrativeUpdate { .. } => "server.narrative.update",
            Self::Error { .. } => "server.error",
        }
    }

    /// Wire payload of the event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::SessionState(state) => json!({"state": state.as_str()}),
            Self::TranscriptPartial { text }
            | Self::TranscriptFinal { text }
            | Self::UserTranscriptPartial { text }
            | Self::UserTranscriptFinal { text } => json!({"text": text}),
            Self::AudioOut { data } => json!({"data": data}),
            Self::AudioStop { reason } => json!({"reason": reason}),
            Self::BargeInAck { timestamp } => json!({"timestamp": timestamp}),
            Self::TriageEmergency { severity, banner } => {
                json!({"severity": severity.as_str(), "banner": banner})
            }
            Self::Kpi { kind, at_ms } => json!({"type": kind.as_str(), "atMs": at_ms}),
            Self::DraftUpdate { args } | Self::NarrativeUpdate { args } => args.clone(),
            Self::Error { message } => json!({"message": message}),
        }
    }

    /// Serialize the full `{type, seq, payload}` frame.
    #[must_use]
    pub fn to_frame(&self, seq: u64) -> String {
        json!({
            "type": self.event_type(),
            "seq": seq,
            "payload": self.payload(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello() {
        let frame = InboundFrame::parse(
            r#"{"type":"client.hello","payload":{"firebase_id_token":"tok","session_config":{"lang":"en"}}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Hello {
                token,
                session_config,
            } => {
                assert_eq!(token, "tok");
                assert_eq!(session_config["lang"], "en");
            }
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn hello_defaults_missing_session_config() {
        let frame = InboundFrame::parse(
            r#"{"type":"client.hello","payload":{"firebase_id_token":"tok"}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            InboundFrame::Hello { session_config, .. } if session_config == json!({})
        ));
    }

    #[test]
    fn parses_audio_chunk_and_legacy_alias() {
        for t in ["client.audio.chunk", "client.audio.chunk.base64"] {
            let frame =
                InboundFrame::parse(&format!(r#"{{"type":"{t}","payload":{{"data":"AAAA"}}}}"#))
                    .unwrap();
            assert_eq!(frame, InboundFrame::AudioChunkBase64 { data: "AAAA".into() });
        }
    }

    #[test]
    fn parses_barge_in_with_optional_fields() {
        let frame = InboundFrame::parse(
            r#"{"type":"client.audio.bargeIn","payload":{"reason":"user_interrupt","timestamp":17}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::BargeIn {
                reason: Some("user_interrupt".into()),
                timestamp: Some(17)
            }
        );

        let bare = InboundFrame::parse(r#"{"type":"client.audio.bargeIn"}"#).unwrap();
        assert_eq!(
            bare,
            InboundFrame::BargeIn {
                reason: None,
                timestamp: None
            }
        );
    }

    #[test]
    fn parses_stop_and_legacy_alias() {
        for t in ["client.session.stop", "client.stop"] {
            let frame = InboundFrame::parse(&format!(r#"{{"type":"{t}"}}"#)).unwrap();
            assert_eq!(frame, InboundFrame::Stop);
        }
    }

    #[test]
    fn rejects_unknown_type_and_bad_json() {
        assert!(InboundFrame::parse(r#"{"type":"client.nope"}"#).is_err());
        assert!(InboundFrame::parse("pcm pcm pcm").is_err());
        assert!(InboundFrame::parse(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn hello_without_token_is_malformed() {
        let err = InboundFrame::parse(r#"{"type":"client.hello","payload":{}}"#).unwrap_err();
        assert!(matches!(
            err,
            crate::error::GatewayError::MalformedClientMessage(_)
        ));
    }

    #[test]
    fn frame_shape_has_type_seq_payload() {
        let frame = ServerEvent::SessionState(ClientSessionState::Connecting).to_frame(1);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "server.session.state");
        assert_eq!(value["seq"], 1);
        assert_eq!(value["payload"]["state"], "connecting");
    }

    #[test]
    fn kpi_payload_uses_at_ms_spelling() {
        let frame = ServerEvent::Kpi {
            kind: KpiKind::FirstModelAudio,
            at_ms: 123,
        }
        .to_frame(9);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["payload"]["type"], "first_model_audio");
        assert_eq!(value["payload"]["atMs"], 123);
    }

    #[test]
    fn triage_payload_carries_severity_and_banner() {
        let frame = ServerEvent::TriageEmergency {
            severity: Severity::Critical,
            banner: "call emergency services".into(),
        }
        .to_frame(2);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["payload"]["severity"], "critical");
        assert!(!value["payload"]["banner"].as_str().unwrap().is_empty());
    }
}
