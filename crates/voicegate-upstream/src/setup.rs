//! Session setup frame for the bidirectional channel.
//!
//! Sent exactly once, immediately after the WebSocket opens. Field spellings
//! follow the `BidiGenerateContent` wire protocol (camelCase).

use serde::Serialize;
use serde_json::Value;

use voicegate_core::config::VertexSettings;

/// Top-level setup message.
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    /// Fully-qualified publisher model resource.
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(
        rename = "inputAudioTranscription",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_audio_transcription: Option<Value>,
    #[serde(
        rename = "outputAudioTranscription",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_audio_transcription: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(rename = "speechConfig")]
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Build the setup frame from gateway settings plus the per-session config
/// the client sent in its hello. Recognized session keys:
/// `response_modalities`, `temperature`, `top_p`, `top_k`,
/// `system_instruction`, `voice`, `function_declarations`,
/// `input_transcription`, `output_transcription`.
#[must_use]
pub fn build_setup(vertex: &VertexSettings, session_config: &Value) -> SetupMessage {
    let modalities = session_config
        .get("response_modalities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_uppercase)
                .collect::<Vec<_>>()
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| vec!["AUDIO".to_string()]);

    let voice = session_config
        .get("voice")
        .and_then(Value::as_str)
        .unwrap_or(&vertex.voice)
        .to_string();

    let instruction = session_config
        .get("system_instruction")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| vertex.system_instruction.clone());

    let tools = session_config
        .get("function_declarations")
        .and_then(Value::as_array)
        .filter(|decls| !decls.is_empty())
        .map(|decls| vec![serde_json::json!({"functionDeclarations": decls})]);

    SetupMessage {
        setup: SetupPayload {
            model: format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                vertex.project_id, vertex.location, vertex.model
            ),
            generation_config: GenerationConfig {
                response_modalities: modalities,
                temperature: session_config.get("temperature").and_then(Value::as_f64),
                top_p: session_config.get("top_p").and_then(Value::as_f64),
                top_k: session_config.get("top_k").and_then(Value::as_i64),
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                    },
                },
            },
            system_instruction: instruction
                .map(|text| SystemInstruction {
                    parts: vec![TextPart { text }],
                }),
            tools,
            input_audio_transcription: transcription_toggle(session_config, "input_transcription"),
            output_audio_transcription: transcription_toggle(
                session_config,
                "output_transcription",
            ),
        },
    }
}

/// Transcription toggles default to on; an explicit `false` omits the field.
fn transcription_toggle(session_config: &Value, key: &str) -> Option<Value> {
    match session_config.get(key).and_then(Value::as_bool) {
        Some(false) => None,
        _ => Some(serde_json::json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vertex() -> VertexSettings {
        VertexSettings {
            project_id: "demo".into(),
            location: "us-central1".into(),
            model: "gemini-2.0-flash-live-preview-04-09".into(),
            voice: "Aoede".into(),
            system_instruction: Some("Be brief.".into()),
        }
    }

    #[test]
    fn model_path_is_fully_qualified() {
        let msg = build_setup(&vertex(), &json!({}));
        assert_eq!(
            msg.setup.model,
            "projects/demo/locations/us-central1/publishers/google/models/gemini-2.0-flash-live-preview-04-09"
        );
    }

    #[test]
    fn defaults_audio_modality_and_transcriptions_on() {
        let msg = build_setup(&vertex(), &json!({}));
        assert_eq!(msg.setup.generation_config.response_modalities, vec!["AUDIO"]);
        assert!(msg.setup.input_audio_transcription.is_some());
        assert!(msg.setup.output_audio_transcription.is_some());
    }

    #[test]
    fn session_config_overrides_voice_and_sampling() {
        let msg = build_setup(
            &vertex(),
            &json!({"voice": "Puck", "temperature": 0.4, "top_p": 0.9, "top_k": 32}),
        );
        let config = &msg.setup.generation_config;
        assert_eq!(
            config.speech_config.voice_config.prebuilt_voice_config.voice_name,
            "Puck"
        );
        assert_eq!(config.temperature, Some(0.4));
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.top_k, Some(32));
    }

    #[test]
    fn explicit_false_disables_transcription() {
        let msg = build_setup(&vertex(), &json!({"output_transcription": false}));
        assert!(msg.setup.output_audio_transcription.is_none());
        assert!(msg.setup.input_audio_transcription.is_some());
    }

    #[test]
    fn function_declarations_become_tools() {
        let decls = json!({"function_declarations": [
            {"name": "update_draft", "parameters": {"type": "object"}}
        ]});
        let msg = build_setup(&vertex(), &decls);
        let tools = msg.setup.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(tools[0]["functionDeclarations"][0]["name"] == "update_draft");
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let msg = build_setup(&vertex(), &json!({"temperature": 0.2}));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"generationConfig\""));
        assert!(json.contains("\"responseModalities\""));
        assert!(json.contains("\"prebuiltVoiceConfig\""));
        assert!(json.contains("\"systemInstruction\""));
        assert!(json.contains("\"inputAudioTranscription\""));
    }
}
