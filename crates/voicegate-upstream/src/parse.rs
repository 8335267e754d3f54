//! Server-message parser for the bidirectional channel.
//!
//! The wire format has drifted across protocol revisions, so the parser
//! accepts every known field spelling at the boundary and maps each message
//! onto the single canonical [`UpstreamEvent`] vocabulary. One server
//! message can carry several events (audio parts plus a transcript, for
//! example).

use base64::Engine;
use serde_json::Value;

use voicegate_core::gate::ForwardGate;
use voicegate_core::ports::UpstreamEvent;

/// Accepted spellings for the setup acknowledgement.
const SETUP_COMPLETE_KEYS: &[&str] = &["setupComplete", "setup_complete", "setupDone"];

/// Accepted spellings for the user-speech transcription field.
const USER_TRANSCRIPT_KEYS: &[&str] = &["inputTranscription", "userTranscript", "userTranscription"];

/// Accepted spellings for the assistant-speech transcription field.
const MODEL_TRANSCRIPT_KEYS: &[&str] =
    &["outputAudioTranscription", "outputTranscription", "modelTranscription"];

/// A tool call that needs an acknowledgement sent back on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAck {
    pub name: String,
    pub call_id: Option<String>,
}

/// Everything extracted from one server message.
#[derive(Debug, Default)]
pub struct ParsedMessage {
    /// The message acknowledged session setup.
    pub setup_complete: bool,
    /// A server error/status that terminates the setup wait.
    pub fatal: Option<String>,
    /// Events for the coordinator, in wire order.
    pub events: Vec<UpstreamEvent>,
    /// Tool calls to acknowledge.
    pub acks: Vec<ToolAck>,
}

/// Parse one decoded JSON server message.
///
/// Audio parts are dropped here when `gate` is closed; an observed
/// `interrupted` flag closes the gate before any later parts of the same
/// message are inspected.
#[must_use]
pub fn parse_message(value: &Value, gate: &ForwardGate) -> ParsedMessage {
    let mut out = ParsedMessage::default();

    if SETUP_COMPLETE_KEYS.iter().any(|k| value.get(k).is_some())
        || value.get("ready").and_then(Value::as_bool) == Some(true)
    {
        out.setup_complete = true;
        out.events.push(UpstreamEvent::Setup);
    }

    if let Some(content) = value.get("serverContent") {
        parse_server_content(content, gate, &mut out);
    }

    // Current protocol revisions put tool calls at the top level.
    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        for call in calls {
            push_function_call(call, &mut out);
        }
    }

    if let Some(message) = fatal_message(value) {
        out.events.push(UpstreamEvent::Error(message.clone()));
        out.fatal = Some(message);
    }

    out
}

fn parse_server_content(content: &Value, gate: &ForwardGate, out: &mut ParsedMessage) {
    if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
        // Close the gate before touching modelTurn so audio in the same
        // message is already suppressed.
        gate.disable();
        out.events.push(UpstreamEvent::BargeIn);
    }

    if let Some((text, is_partial)) = transcript_from(content, USER_TRANSCRIPT_KEYS) {
        out.events.push(UpstreamEvent::UserTranscript { text, is_partial });
    }

    if let Some(turn) = content.get("modelTurn") {
        let complete = turn.get("complete").and_then(Value::as_bool) == Some(true);
        if let Some(parts) = turn.get("parts").and_then(Value::as_array) {
            for part in parts {
                if let Some(inline) = part.get("inlineData") {
                    if let Some(data) = inline.get("data").and_then(Value::as_str) {
                        if !gate.is_enabled() {
                            tracing::debug!("Dropping model audio part — forward gate closed");
                        } else if let Ok(bytes) =
                            base64::engine::general_purpose::STANDARD.decode(data)
                        {
                            out.events.push(UpstreamEvent::Audio(bytes));
                        } else {
                            tracing::warn!("Undecodable inlineData audio part — skipping");
                        }
                    }
                }
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        out.events.push(UpstreamEvent::Transcript {
                            text: text.to_string(),
                            is_partial: !complete,
                        });
                    }
                }
                if let Some(call) = part.get("functionCall") {
                    push_function_call(call, out);
                }
            }
        }
    }

    if let Some((text, is_partial)) = transcript_from(content, MODEL_TRANSCRIPT_KEYS) {
        out.events.push(UpstreamEvent::Transcript { text, is_partial });
    }
}

/// Extract `{text, finished?}` under the first present spelling of `keys`.
fn transcript_from(content: &Value, keys: &[&str]) -> Option<(String, bool)> {
    let node = keys.iter().find_map(|k| content.get(*k))?;
    let text = node.get("text").and_then(Value::as_str)?;
    if text.is_empty() {
        return None;
    }
    let finished = node.get("finished").and_then(Value::as_bool) == Some(true)
        || node.get("isFinal").and_then(Value::as_bool) == Some(true);
    Some((text.to_string(), !finished))
}

fn push_function_call(call: &Value, out: &mut ParsedMessage) {
    let Some(name) = call.get("name").and_then(Value::as_str) else {
        tracing::warn!("Function call without a name — skipping");
        return;
    };
    let args = call.get("args").cloned().unwrap_or(Value::Null);
    let call_id = call
        .get("id")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    match name {
        "update_draft" => out.events.push(UpstreamEvent::DraftUpdate(args)),
        "update_narrative" => out.events.push(UpstreamEvent::NarrativeUpdate(args)),
        other => {
            tracing::warn!(function = other, "Unknown tool call — acknowledging without event");
        }
    }

    out.acks.push(ToolAck {
        name: name.to_string(),
        call_id,
    });
}

/// Top-level `error`/`status` fields carry a terminal server condition.
fn fatal_message(value: &Value) -> Option<String> {
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        return Some(message.to_string());
    }
    if let Some(status) = value.get("status") {
        let message = status
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| status.as_str())
            .unwrap_or("server status");
        return Some(message.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_gate() -> ForwardGate {
        ForwardGate::new()
    }

    #[test]
    fn setup_complete_all_spellings() {
        for key in ["setupComplete", "setup_complete", "setupDone"] {
            let parsed = parse_message(&json!({(key): {}}), &open_gate());
            assert!(parsed.setup_complete, "spelling {key} not accepted");
            assert!(parsed.events.contains(&UpstreamEvent::Setup));
        }
        let parsed = parse_message(&json!({"ready": true}), &open_gate());
        assert!(parsed.setup_complete);
    }

    #[test]
    fn interrupted_closes_gate_and_emits_barge_in() {
        let gate = open_gate();
        let parsed = parse_message(&json!({"serverContent": {"interrupted": true}}), &gate);
        assert!(parsed.events.contains(&UpstreamEvent::BargeIn));
        assert!(!gate.is_enabled());
    }

    #[test]
    fn interrupted_suppresses_audio_in_same_message() {
        let audio = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let gate = open_gate();
        let parsed = parse_message(
            &json!({"serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": audio}}]}
            }}),
            &gate,
        );
        assert!(
            !parsed
                .events
                .iter()
                .any(|e| matches!(e, UpstreamEvent::Audio(_))),
            "audio must not survive the interrupt"
        );
    }

    #[test]
    fn audio_part_decodes_when_gate_open() {
        let audio = base64::engine::general_purpose::STANDARD.encode([10u8, 20, 30]);
        let parsed = parse_message(
            &json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": audio}}
            ]}}}),
            &open_gate(),
        );
        assert_eq!(parsed.events, vec![UpstreamEvent::Audio(vec![10, 20, 30])]);
    }

    #[test]
    fn audio_dropped_when_gate_closed() {
        let audio = base64::engine::general_purpose::STANDARD.encode([10u8, 20, 30]);
        let gate = open_gate();
        gate.disable();
        let parsed = parse_message(
            &json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"data": audio}}
            ]}}}),
            &gate,
        );
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn model_turn_text_partial_until_complete() {
        let partial = parse_message(
            &json!({"serverContent": {"modelTurn": {"parts": [{"text": "The fever"}]}}}),
            &open_gate(),
        );
        assert_eq!(
            partial.events,
            vec![UpstreamEvent::Transcript {
                text: "The fever".into(),
                is_partial: true
            }]
        );

        let done = parse_message(
            &json!({"serverContent": {"modelTurn": {
                "complete": true,
                "parts": [{"text": "The fever should pass."}]
            }}}),
            &open_gate(),
        );
        assert_eq!(
            done.events,
            vec![UpstreamEvent::Transcript {
                text: "The fever should pass.".into(),
                is_partial: false
            }]
        );
    }

    #[test]
    fn user_transcript_all_spellings() {
        for key in ["inputTranscription", "userTranscript", "userTranscription"] {
            let parsed = parse_message(
                &json!({"serverContent": {(key): {"text": "my chest hurts", "finished": true}}}),
                &open_gate(),
            );
            assert_eq!(
                parsed.events,
                vec![UpstreamEvent::UserTranscript {
                    text: "my chest hurts".into(),
                    is_partial: false
                }],
                "spelling {key} not accepted"
            );
        }
    }

    #[test]
    fn assistant_transcript_all_spellings_default_partial() {
        for key in ["outputAudioTranscription", "outputTranscription", "modelTranscription"] {
            let parsed = parse_message(
                &json!({"serverContent": {(key): {"text": "Let me check"}}}),
                &open_gate(),
            );
            assert_eq!(
                parsed.events,
                vec![UpstreamEvent::Transcript {
                    text: "Let me check".into(),
                    is_partial: true
                }],
                "spelling {key} not accepted"
            );
        }
    }

    #[test]
    fn empty_transcript_ignored() {
        let parsed = parse_message(
            &json!({"serverContent": {"inputTranscription": {"text": ""}}}),
            &open_gate(),
        );
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn known_tool_calls_emit_events_and_acks() {
        let parsed = parse_message(
            &json!({"toolCall": {"functionCalls": [
                {"name": "update_draft", "args": {"symptom": "cough"}, "id": "call-1"},
                {"name": "update_narrative", "args": {"summary": "..."}}
            ]}}),
            &open_gate(),
        );
        assert!(matches!(parsed.events[0], UpstreamEvent::DraftUpdate(_)));
        assert!(matches!(parsed.events[1], UpstreamEvent::NarrativeUpdate(_)));
        assert_eq!(parsed.acks.len(), 2);
        assert_eq!(parsed.acks[0].call_id.as_deref(), Some("call-1"));
        assert_eq!(parsed.acks[1].call_id, None);
    }

    #[test]
    fn unknown_tool_call_acked_without_event() {
        let parsed = parse_message(
            &json!({"serverContent": {"modelTurn": {"parts": [
                {"functionCall": {"name": "order_labs", "args": {}}}
            ]}}}),
            &open_gate(),
        );
        assert!(parsed.events.is_empty());
        assert_eq!(parsed.acks.len(), 1);
        assert_eq!(parsed.acks[0].name, "order_labs");
    }

    #[test]
    fn server_error_is_fatal() {
        let parsed = parse_message(
            &json!({"error": {"message": "quota exceeded"}}),
            &open_gate(),
        );
        assert_eq!(parsed.fatal.as_deref(), Some("quota exceeded"));
        assert!(matches!(&parsed.events[0], UpstreamEvent::Error(m) if m == "quota exceeded"));
    }

    #[test]
    fn status_field_is_fatal_too() {
        let parsed = parse_message(
            &json!({"status": {"message": "session expired"}}),
            &open_gate(),
        );
        assert_eq!(parsed.fatal.as_deref(), Some("session expired"));
    }

    #[test]
    fn mixed_message_preserves_wire_order() {
        let audio = base64::engine::general_purpose::STANDARD.encode([7u8]);
        let parsed = parse_message(
            &json!({"serverContent": {
                "inputTranscription": {"text": "hello"},
                "modelTurn": {"parts": [
                    {"inlineData": {"data": audio}},
                    {"text": "Hi there"}
                ]}
            }}),
            &open_gate(),
        );
        assert_eq!(parsed.events.len(), 3);
        assert!(matches!(parsed.events[0], UpstreamEvent::UserTranscript { .. }));
        assert!(matches!(parsed.events[1], UpstreamEvent::Audio(_)));
        assert!(matches!(parsed.events[2], UpstreamEvent::Transcript { .. }));
    }
}
