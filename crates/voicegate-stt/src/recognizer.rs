//! WebSocket streaming recognizer adapter.
//!
//! Speaks the common live-transcription wire shape: query parameters select
//! linear PCM16 at 16 kHz mono with interim results and automatic
//! punctuation; audio goes out as binary frames; transcripts come back as
//! JSON text frames with `channel.alternatives[0].transcript` and an
//! `is_final` flag.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use voicegate_core::config::SttSettings;
use voicegate_core::error::AsrError;
use voicegate_core::ports::{RecognizerEvent, RecognizerFactory, StreamingRecognizer};

/// Query contract required by the gateway: PCM16 LE 16 kHz mono, interim
/// results, automatic punctuation.
const STREAM_QUERY: &str =
    "encoding=linear16&sample_rate=16000&channels=1&interim_results=true&punctuate=true";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

#[derive(Debug, Deserialize)]
struct StreamingResponse {
    channel: Option<Channel>,
    is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
}

/// One recognizer stream over a WebSocket endpoint.
pub struct WsRecognizer {
    endpoint: String,
    api_key: Option<String>,
    ws_sender: Option<WsSink>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl WsRecognizer {
    #[must_use]
    pub const fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key,
            ws_sender: None,
            reader_task: None,
        }
    }
}

#[async_trait]
impl StreamingRecognizer for WsRecognizer {
    async fn open(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>, AsrError> {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", self.endpoint, separator, STREAM_QUERY);

        let mut request = url
            .into_client_request()
            .map_err(|e| AsrError::Connect(format!("bad endpoint: {e}")))?;
        if let Some(key) = &self.api_key {
            request.headers_mut().insert(
                "Authorization",
                format!("Token {key}")
                    .parse()
                    .map_err(|_| AsrError::Connect("api key not header-safe".into()))?,
            );
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| AsrError::Connect(format!("connect failed: {e}")))?;

        tracing::debug!("Recognizer stream connected");

        let (write, mut read) = ws.split();
        let (event_tx, event_rx) = mpsc::channel::<RecognizerEvent>(64);

        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(response) = serde_json::from_str::<StreamingResponse>(&text) else {
                            tracing::debug!("Unparseable recognizer frame — skipping");
                            continue;
                        };
                        let Some(transcript) = response
                            .channel
                            .as_ref()
                            .and_then(|c| c.alternatives.first())
                            .map(|a| a.transcript.clone())
                        else {
                            continue;
                        };
                        if transcript.is_empty() {
                            continue;
                        }
                        let event = RecognizerEvent::Transcript {
                            text: transcript,
                            is_partial: !response.is_final.unwrap_or(false),
                        };
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        let _ = event_tx.send(RecognizerEvent::Closed).await;
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx.send(RecognizerEvent::Error(e.to_string())).await;
                        return;
                    }
                    Ok(_) => {}
                }
            }
            let _ = event_tx.send(RecognizerEvent::Closed).await;
        });

        self.ws_sender = Some(write);
        self.reader_task = Some(reader);
        Ok(event_rx)
    }

    async fn write(&mut self, pcm: &[u8]) -> Result<(), AsrError> {
        // No-op before open(), per the contract.
        let Some(sender) = self.ws_sender.as_mut() else {
            return Ok(());
        };
        sender
            .send(WsMessage::Binary(pcm.to_vec()))
            .await
            .map_err(|e| AsrError::Stream(format!("audio send failed: {e}")))
    }

    async fn finish(&mut self) {
        if let Some(mut sender) = self.ws_sender.take() {
            let _ = sender.send(WsMessage::Close(None)).await;
            let _ = sender.close().await;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Build a recognizer factory from settings. Returns `None` when no endpoint
/// is configured — the fallback path then stays off for every session.
#[must_use]
pub fn ws_recognizer_factory(stt: &SttSettings) -> Option<RecognizerFactory> {
    let endpoint = stt.endpoint.clone()?;
    let api_key = stt.api_key.clone();
    let factory: RecognizerFactory = Arc::new(move || {
        Box::new(WsRecognizer::new(endpoint.clone(), api_key.clone()))
    });
    Some(factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_before_open_is_a_no_op() {
        let mut recognizer = WsRecognizer::new("wss://example.invalid/listen".into(), None);
        recognizer.write(&[0u8; 640]).await.unwrap();
    }

    #[tokio::test]
    async fn finish_without_open_is_safe() {
        let mut recognizer = WsRecognizer::new("wss://example.invalid/listen".into(), None);
        recognizer.finish().await;
    }

    #[test]
    fn factory_requires_an_endpoint() {
        let stt = SttSettings {
            fallback_enabled: true,
            disable_on_vertex: true,
            endpoint: None,
            api_key: None,
            max_retries: 5,
            retry_base: std::time::Duration::from_millis(500),
        };
        assert!(ws_recognizer_factory(&stt).is_none());

        let with_endpoint = SttSettings {
            endpoint: Some("wss://stt.example.com/v1/listen".into()),
            ..stt
        };
        assert!(ws_recognizer_factory(&with_endpoint).is_some());
    }

    #[test]
    fn transcript_frames_deserialize() {
        let frame = r#"{"channel":{"alternatives":[{"transcript":"hello there"}]},"is_final":true}"#;
        let response: StreamingResponse = serde_json::from_str(frame).unwrap();
        assert_eq!(
            response.channel.unwrap().alternatives[0].transcript,
            "hello there"
        );
        assert_eq!(response.is_final, Some(true));
    }
}
