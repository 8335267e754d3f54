//! The live upstream session: connection manager for the bidirectional
//! model channel.
//!
//! One [`LiveSession`] per gateway session. The coordinator drives it through
//! the [`UpstreamPort`] trait; two background loops own the socket halves:
//!
//! * **Outbound** — drains a bounded channel of pre-serialized frames and is
//!   the only task that touches the write half; it also stamps
//!   `last_activity` for the keepalive ticker.
//! * **Inbound** — decodes Text and Binary JSON frames, runs the variant
//!   parser, signals setup completion through a one-shot, forwards typed
//!   events to the coordinator, and auto-acknowledges tool calls.
//!
//! A keepalive loop pings the channel when it has been idle for more than
//! 25 s, every 30 s tick, while connected and set up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use voicegate_core::config::{Settings, VertexSettings};
use voicegate_core::error::UpstreamError;
use voicegate_core::gate::ForwardGate;
use voicegate_core::ports::{UpstreamEvent, UpstreamFactory, UpstreamPort};

use crate::credentials;
use crate::parse;
use crate::setup::build_setup;

/// Hard upper bound on the WebSocket connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard upper bound on the setup acknowledgement after connect.
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Keepalive tick period.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Idle threshold beyond which a tick sends a ping.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(25);

/// MIME type for user microphone audio.
const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Messages for the outbound loop.
#[derive(Debug)]
enum Outbound {
    /// A serialized JSON frame.
    Frame(String),
    /// Keepalive ping.
    Ping,
    /// Graceful close.
    Close,
}

/// Live bidirectional session against the Gemini Live endpoint.
pub struct LiveSession {
    vertex: VertexSettings,
    token_override: Option<String>,
    gate: ForwardGate,
    access_token: Option<String>,
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    last_activity: Arc<Mutex<Instant>>,
    is_setup: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl LiveSession {
    #[must_use]
    pub fn new(vertex: VertexSettings, token_override: Option<String>, gate: ForwardGate) -> Self {
        Self {
            vertex,
            token_override,
            gate,
            access_token: None,
            outbound_tx: None,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            is_setup: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "wss://{}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent",
            self.vertex.location
        )
    }

    /// Queue a frame on the outbound loop. Refused before setup completes.
    async fn send_frame(&self, frame: Value) -> Result<(), UpstreamError> {
        if !self.is_setup() {
            tracing::warn!("Refusing to send on a channel that is not set up");
            return Err(UpstreamError::ChannelClosed);
        }
        let tx = self.outbound_tx.as_ref().ok_or(UpstreamError::ChannelClosed)?;
        tx.send(Outbound::Frame(frame.to_string()))
            .await
            .map_err(|_| UpstreamError::ChannelClosed)
    }
}

#[async_trait]
impl UpstreamPort for LiveSession {
    async fn initialize(&mut self) -> Result<(), UpstreamError> {
        let token = credentials::fetch_access_token(self.token_override.as_deref()).await?;
        self.access_token = Some(token);
        Ok(())
    }

    async fn start(
        &mut self,
        session_config: &Value,
    ) -> Result<mpsc::Receiver<UpstreamEvent>, UpstreamError> {
        if self.outbound_tx.is_some() {
            return Err(UpstreamError::Setup("channel already started".into()));
        }
        let token = self
            .access_token
            .clone()
            .ok_or_else(|| UpstreamError::Auth("no credential — initialize first".into()))?;

        let mut request = self
            .endpoint()
            .into_client_request()
            .map_err(|e| UpstreamError::Setup(format!("bad endpoint: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| UpstreamError::Auth("credential not header-safe".into()))?,
        );

        tracing::info!(model = %self.vertex.model, location = %self.vertex.location, "Connecting upstream channel");

        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| UpstreamError::SetupTimeout(CONNECT_TIMEOUT))?
            .map_err(|e| UpstreamError::Setup(format!("connect failed: {e}")))?;

        let (mut ws_sender, ws_receiver) = ws.split();

        let setup_frame = serde_json::to_string(&build_setup(&self.vertex, session_config))
            .map_err(|e| UpstreamError::Setup(format!("setup not serializable: {e}")))?;
        ws_sender
            .send(WsMessage::Text(setup_frame))
            .await
            .map_err(|e| UpstreamError::Setup(format!("setup send failed: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);
        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(256);
        let (setup_tx, setup_rx) = oneshot::channel::<Result<(), String>>();

        tokio::spawn(outbound_loop(
            ws_sender,
            outbound_rx,
            Arc::clone(&self.last_activity),
            self.cancel.clone(),
        ));
        tokio::spawn(inbound_loop(
            ws_receiver,
            event_tx,
            outbound_tx.clone(),
            self.gate.clone(),
            Arc::clone(&self.is_setup),
            setup_tx,
            self.cancel.clone(),
        ));

        let outcome = tokio::select! {
            res = setup_rx => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(UpstreamError::Setup(message)),
                Err(_) => Err(UpstreamError::Setup("channel closed before setup completed".into())),
            },
            () = tokio::time::sleep(SETUP_TIMEOUT) => Err(UpstreamError::SetupTimeout(SETUP_TIMEOUT)),
        };

        if let Err(e) = outcome {
            self.cancel.cancel();
            return Err(e);
        }

        tokio::spawn(keepalive_loop(
            outbound_tx.clone(),
            Arc::clone(&self.last_activity),
            Arc::clone(&self.is_setup),
            self.cancel.clone(),
        ));

        self.outbound_tx = Some(outbound_tx);
        tracing::info!("Upstream session set up — ready to stream");
        Ok(event_rx)
    }

    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError> {
        if pcm.is_empty() {
            return Ok(());
        }
        self.send_frame(audio_frame(pcm)).await
    }

    async fn send_text_turn(&mut self, text: &str) -> Result<(), UpstreamError> {
        self.send_frame(text_turn_frame(text)).await
    }

    async fn send_turn_complete(
        &mut self,
        reenable_forwarding: bool,
    ) -> Result<(), UpstreamError> {
        self.send_frame(turn_complete_frame()).await?;
        if reenable_forwarding {
            self.gate.enable();
        }
        Ok(())
    }

    async fn cancel_output(&mut self) -> Result<(), UpstreamError> {
        // Gate first: forwarding stays off even when the send fails.
        self.gate.disable();
        self.send_turn_complete(false).await
    }

    async fn send_function_response(
        &mut self,
        name: &str,
        response: Value,
        call_id: Option<String>,
    ) -> Result<(), UpstreamError> {
        self.send_frame(function_response_frame(name, &response, call_id.as_deref()))
            .await
    }

    async fn close(&mut self) {
        if let Some(tx) = self.outbound_tx.take() {
            let _ = tx.send(Outbound::Close).await;
        }
        self.cancel.cancel();
        self.is_setup.store(false, Ordering::SeqCst);
        tracing::debug!("Upstream session closed");
    }

    fn is_setup(&self) -> bool {
        self.is_setup.load(Ordering::SeqCst)
    }
}

/// Build an [`UpstreamFactory`] that opens one live session per gateway
/// session, sharing the session's forward gate.
#[must_use]
pub fn live_session_factory(settings: &Settings) -> UpstreamFactory {
    let vertex = settings.vertex.clone();
    let token_override = settings.google_access_token.clone();
    Arc::new(move |gate| {
        Box::new(LiveSession::new(vertex.clone(), token_override.clone(), gate))
    })
}

// ── Frame builders ─────────────────────────────────────────────────

/// User audio chunk: base64 `inlineData` turn with `turnComplete = false`.
fn audio_frame(pcm: &[u8]) -> Value {
    let data = base64::engine::general_purpose::STANDARD.encode(pcm);
    json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{"inlineData": {"mimeType": INPUT_AUDIO_MIME, "data": data}}]
            }],
            "turnComplete": false
        }
    })
}

/// User text turn with `turnComplete = true`.
fn text_turn_frame(text: &str) -> Value {
    json!({
        "clientContent": {
            "turns": [{"role": "user", "parts": [{"text": text}]}],
            "turnComplete": true
        }
    })
}

/// Minimal empty user turn with `turnComplete = true`.
fn turn_complete_frame() -> Value {
    json!({
        "clientContent": {
            "turns": [{"role": "user", "parts": []}],
            "turnComplete": true
        }
    })
}

/// Tool acknowledgement as a user turn with `turnComplete = false`.
fn function_response_frame(name: &str, response: &Value, call_id: Option<&str>) -> Value {
    let mut function_response = json!({"name": name, "response": response});
    if let Some(id) = call_id {
        function_response["id"] = json!(id);
    }
    json!({
        "clientContent": {
            "turns": [{"role": "user", "parts": [{"functionResponse": function_response}]}],
            "turnComplete": false
        }
    })
}

// ── Background loops ───────────────────────────────────────────────

/// Drains the outbound queue into the socket write half.
async fn outbound_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<Outbound>,
    last_activity: Arc<Mutex<Instant>>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            msg = rx.recv() => msg,
        };
        let Some(msg) = msg else { break };

        let ws_msg = match msg {
            Outbound::Frame(text) => WsMessage::Text(text),
            Outbound::Ping => WsMessage::Ping(Vec::new()),
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };

        if sink.send(ws_msg).await.is_err() {
            tracing::warn!("Upstream send failed — closing outbound loop");
            break;
        }
        *last_activity.lock().unwrap() = Instant::now();
    }

    tracing::debug!("Upstream outbound loop terminated");
}

/// Reads the socket, parses server messages, forwards typed events, and
/// acknowledges tool calls.
async fn inbound_loop(
    mut stream: WsSource,
    event_tx: mpsc::Sender<UpstreamEvent>,
    outbound_tx: mpsc::Sender<Outbound>,
    gate: ForwardGate,
    is_setup: Arc<AtomicBool>,
    setup_tx: oneshot::Sender<Result<(), String>>,
    cancel: CancellationToken,
) {
    let mut setup_tx = Some(setup_tx);

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };

        let Some(msg) = msg else {
            let _ = event_tx
                .send(UpstreamEvent::Closed {
                    code: None,
                    reason: "stream ended".into(),
                })
                .await;
            break;
        };

        match msg {
            Ok(WsMessage::Text(text)) => {
                if !dispatch_json(text.as_bytes(), &event_tx, &outbound_tx, &gate, &is_setup, &mut setup_tx)
                    .await
                {
                    break;
                }
            }
            // The server delivers JSON control messages in Binary frames too.
            Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                if !dispatch_json(&data, &event_tx, &outbound_tx, &gate, &is_setup, &mut setup_tx)
                    .await
                {
                    break;
                }
            }
            Ok(WsMessage::Binary(data)) => {
                tracing::warn!(len = data.len(), "Unexpected non-JSON binary frame — skipping");
            }
            Ok(WsMessage::Close(frame)) => {
                if let Some(tx) = setup_tx.take() {
                    let _ = tx.send(Err("channel closed before setup completed".into()));
                }
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or((None, String::new()));
                let _ = event_tx.send(UpstreamEvent::Closed { code, reason }).await;
                break;
            }
            Ok(_) => {} // ping/pong handled by tungstenite
            Err(e) => {
                if let Some(tx) = setup_tx.take() {
                    let _ = tx.send(Err(format!("transport error during setup: {e}")));
                }
                let _ = event_tx.send(UpstreamEvent::Error(e.to_string())).await;
                break;
            }
        }
    }

    tracing::debug!("Upstream inbound loop terminated");
}

/// Parse one JSON payload and fan its contents out. Returns `false` when the
/// event receiver is gone and the loop should stop.
async fn dispatch_json(
    raw: &[u8],
    event_tx: &mpsc::Sender<UpstreamEvent>,
    outbound_tx: &mpsc::Sender<Outbound>,
    gate: &ForwardGate,
    is_setup: &Arc<AtomicBool>,
    setup_tx: &mut Option<oneshot::Sender<Result<(), String>>>,
) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(raw) else {
        tracing::warn!(len = raw.len(), "Unparseable upstream message — skipping");
        return true;
    };

    let parsed = parse::parse_message(&value, gate);

    if parsed.setup_complete {
        is_setup.store(true, Ordering::SeqCst);
        if let Some(tx) = setup_tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    if let Some(message) = &parsed.fatal {
        if let Some(tx) = setup_tx.take() {
            let _ = tx.send(Err(message.clone()));
        }
    }

    for ack in parsed.acks {
        let frame = function_response_frame(&ack.name, &json!({"status": "ok"}), ack.call_id.as_deref());
        if outbound_tx.send(Outbound::Frame(frame.to_string())).await.is_err() {
            tracing::warn!("Outbound loop gone — tool ack dropped");
        }
    }

    for event in parsed.events {
        if event_tx.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped — closing inbound loop");
            return false;
        }
    }

    true
}

/// Pings the channel when idle. Only while connected and set up.
async fn keepalive_loop(
    outbound_tx: mpsc::Sender<Outbound>,
    last_activity: Arc<Mutex<Instant>>,
    is_setup: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(KEEPALIVE_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !is_setup.load(Ordering::SeqCst) {
                    continue;
                }
                let idle = last_activity.lock().unwrap().elapsed();
                if idle > KEEPALIVE_IDLE {
                    tracing::debug!(idle_secs = idle.as_secs(), "Keepalive ping");
                    if outbound_tx.send(Outbound::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("Keepalive loop terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> VertexSettings {
        VertexSettings {
            project_id: "demo".into(),
            location: "europe-west4".into(),
            model: "gemini-2.0-flash-live-preview-04-09".into(),
            voice: "Aoede".into(),
            system_instruction: None,
        }
    }

    #[test]
    fn endpoint_uses_regional_host() {
        let session = LiveSession::new(settings(), None, ForwardGate::new());
        assert_eq!(
            session.endpoint(),
            "wss://europe-west4-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent"
        );
    }

    #[test]
    fn audio_frame_wraps_base64_inline_data() {
        let frame = audio_frame(&[0, 1, 2, 3]);
        let part = &frame["clientContent"]["turns"][0]["parts"][0];
        assert_eq!(part["inlineData"]["mimeType"], INPUT_AUDIO_MIME);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(part["inlineData"]["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, vec![0, 1, 2, 3]);
        assert_eq!(frame["clientContent"]["turnComplete"], false);
    }

    #[test]
    fn turn_complete_frame_is_minimal() {
        let frame = turn_complete_frame();
        assert_eq!(frame["clientContent"]["turnComplete"], true);
        assert_eq!(
            frame["clientContent"]["turns"][0]["parts"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn text_turn_completes_the_turn() {
        let frame = text_turn_frame("hello");
        assert_eq!(frame["clientContent"]["turnComplete"], true);
        assert_eq!(frame["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
    }

    #[test]
    fn function_response_frame_carries_optional_id() {
        let with_id = function_response_frame("update_draft", &json!({"status": "ok"}), Some("c1"));
        let part = &with_id["clientContent"]["turns"][0]["parts"][0]["functionResponse"];
        assert_eq!(part["name"], "update_draft");
        assert_eq!(part["id"], "c1");
        assert_eq!(with_id["clientContent"]["turnComplete"], false);

        let without = function_response_frame("update_draft", &json!({}), None);
        let part = &without["clientContent"]["turns"][0]["parts"][0]["functionResponse"];
        assert!(part.get("id").is_none());
    }

    #[tokio::test]
    async fn sends_refused_before_setup() {
        let mut session = LiveSession::new(settings(), None, ForwardGate::new());
        let err = session.send_audio(&[0u8; 640]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::ChannelClosed));

        let err = session.send_turn_complete(true).await.unwrap_err();
        assert!(matches!(err, UpstreamError::ChannelClosed));
    }

    #[tokio::test]
    async fn start_without_initialize_is_an_auth_error() {
        let mut session = LiveSession::new(settings(), None, ForwardGate::new());
        let err = session.start(&json!({})).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
    }

    #[tokio::test]
    async fn cancel_output_closes_gate_even_when_send_fails() {
        let gate = ForwardGate::new();
        let mut session = LiveSession::new(settings(), None, gate.clone());
        assert!(gate.is_enabled());

        // No channel yet, so the turn-complete send fails — the gate must
        // still be closed.
        let result = session.cancel_output().await;
        assert!(result.is_err());
        assert!(!gate.is_enabled());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut session = LiveSession::new(settings(), None, ForwardGate::new());
        session.close().await;
        session.close().await;
        assert!(!session.is_setup());
    }
}
