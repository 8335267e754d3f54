//! The per-session coordinator.
//!
//! Single consumer of the session inbox and sole owner of session state.
//! Drives the lifecycle:
//!
//! ```text
//!   connecting ─▶ authenticating ─▶ upstream_starting ─▶ ready ─▶ listening ⇄ speaking
//!                      │                    │                          │
//!                      ▼                    ▼                          ▼
//!                   errored              errored                    stopping ─▶ closed
//! ```
//!
//! Upstream bring-up runs on a helper task so the inbox stays live while the
//! channel connects — audio arriving before readiness is rejected, never
//! queued behind the setup wait. The helper hands the port back through the
//! inbox together with the start outcome.

use std::sync::Arc;

use base64::Engine;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicegate_core::config::Settings;
use voicegate_core::error::{GatewayError, UpstreamError};
use voicegate_core::gate::ForwardGate;
use voicegate_core::identity::IdentityVerifier;
use voicegate_core::logging;
use voicegate_core::ports::{RecognizerFactory, UpstreamEvent, UpstreamFactory, UpstreamPort};
use voicegate_core::protocol::{ClientSessionState, InboundFrame, KpiKind, ServerEvent};
use voicegate_core::safety::{Severity, scan_transcript};
use voicegate_core::session::{
    EmergencyDetections, SessionCounters, SessionMetrics, SessionState, TranscriptSource,
};
use voicegate_stt::{AsrUpdate, FallbackAsr};

use crate::translator::EventTranslator;

/// Everything that can land in the coordinator's inbox.
pub enum SessionInput {
    /// A client text frame, still serialized.
    Text(String),
    /// A client binary frame — raw PCM16 LE 16 kHz mono.
    Binary(Vec<u8>),
    /// A typed event from the upstream channel.
    Upstream(UpstreamEvent),
    /// The upstream bring-up helper finished.
    UpstreamStarted {
        port: Box<dyn UpstreamPort>,
        outcome: Result<mpsc::Receiver<UpstreamEvent>, UpstreamError>,
    },
    /// An update from the fallback recognizer supervisor.
    Asr(AsrUpdate),
    /// The client socket closed.
    ClientClosed,
}

/// Per-session coordinator. Construct with [`SessionCoordinator::new`], then
/// drive with [`run`](SessionCoordinator::run) on its own task.
pub struct SessionCoordinator {
    session_id: String,
    settings: Arc<Settings>,

    verifier: Arc<dyn IdentityVerifier>,
    upstream_factory: UpstreamFactory,
    recognizer_factory: Option<RecognizerFactory>,

    state: SessionState,
    user_id: Option<String>,
    authenticated: bool,
    upstream_ready: bool,
    stt_active: bool,
    first_audio_in_turn: bool,
    /// Highest safety severity already surfaced this turn; emission only on
    /// escalation, reset at turn boundaries.
    highest_alert_this_turn: Option<Severity>,

    counters: SessionCounters,
    emergency: EmergencyDetections,
    transcript_source: TranscriptSource,
    stt_retry_count: u32,

    gate: ForwardGate,
    translator: EventTranslator,
    upstream: Option<Box<dyn UpstreamPort>>,
    asr: Option<FallbackAsr>,

    inbox_tx: mpsc::Sender<SessionInput>,
    inbox_rx: Option<mpsc::Receiver<SessionInput>>,
    outbound_tx: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
}

impl SessionCoordinator {
    /// Create a coordinator plus its inbox sender and outbound receiver.
    ///
    /// The caller wires the inbox sender into the socket reader and the
    /// outbound receiver into the socket writer.
    #[must_use]
    pub fn new(
        session_id: String,
        settings: Arc<Settings>,
        verifier: Arc<dyn IdentityVerifier>,
        upstream_factory: UpstreamFactory,
        recognizer_factory: Option<RecognizerFactory>,
    ) -> (
        Self,
        mpsc::Sender<SessionInput>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);

        let emit_partials = settings.assistant_emit_partials;
        let coordinator = Self {
            session_id,
            settings,
            verifier,
            upstream_factory,
            recognizer_factory,
            state: SessionState::Connecting,
            user_id: None,
            authenticated: false,
            upstream_ready: false,
            stt_active: false,
            first_audio_in_turn: true,
            highest_alert_this_turn: None,
            counters: SessionCounters::default(),
            emergency: EmergencyDetections::default(),
            transcript_source: TranscriptSource::Vertex,
            stt_retry_count: 0,
            gate: ForwardGate::new(),
            translator: EventTranslator::new(emit_partials),
            upstream: None,
            asr: None,
            inbox_tx: inbox_tx.clone(),
            inbox_rx: Some(inbox_rx),
            outbound_tx,
            cancel: CancellationToken::new(),
        };

        (coordinator, inbox_tx, outbound_rx)
    }

    /// Cancellation token fanned out to session-owned tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current traffic counters (exposed for tests and diagnostics).
    #[must_use]
    pub const fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Consume the inbox until the session reaches a terminal state or both
    /// peers are gone. All owned resources are released before returning.
    pub async fn run(mut self) {
        let mut inbox = self.inbox_rx.take().expect("run called twice");
        logging::session_event(
            "session_opened",
            &self.session_id,
            None,
            json!({"state": self.state}),
        );

        while let Some(input) = inbox.recv().await {
            match input {
                SessionInput::Text(text) => self.on_text(&text).await,
                SessionInput::Binary(bytes) => self.on_binary(bytes).await,
                SessionInput::Upstream(event) => self.on_upstream(event).await,
                SessionInput::UpstreamStarted { port, outcome } => {
                    self.on_upstream_started(port, outcome).await;
                }
                SessionInput::Asr(update) => self.on_asr(update).await,
                SessionInput::ClientClosed => {
                    self.shutdown("client_closed").await;
                }
            }
            if self.state.is_terminal() {
                break;
            }
        }

        self.release_resources().await;
        logging::session_event(
            "session_closed",
            &self.session_id,
            self.user_id.as_deref(),
            json!({"state": self.state}),
        );
    }

    // ── Client frames ──────────────────────────────────────────────

    async fn on_text(&mut self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                logging::session_warn(
                    "malformed_client_message",
                    &self.session_id,
                    self.user_id.as_deref(),
                    json!({"error": e.to_string()}),
                );
                return;
            }
        };

        match frame {
            InboundFrame::Hello {
                token,
                session_config,
            } => self.on_hello(&token, session_config).await,
            InboundFrame::AudioChunkBase64 { data } => {
                match base64::engine::general_purpose::STANDARD.decode(&data) {
                    Ok(pcm) => self.on_binary(pcm).await,
                    Err(_) => {
                        logging::session_warn(
                            "malformed_client_message",
                            &self.session_id,
                            self.user_id.as_deref(),
                            json!({"error": "undecodable base64 audio"}),
                        );
                    }
                }
            }
            InboundFrame::TurnComplete => self.on_turn_complete().await,
            InboundFrame::BargeIn { reason, timestamp } => {
                self.on_barge_in(reason.as_deref(), timestamp).await;
            }
            InboundFrame::Stop => self.on_stop().await,
        }
    }

    async fn on_hello(&mut self, token: &str, session_config: Value) {
        if self.authenticated {
            logging::session_warn(
                "duplicate_hello",
                &self.session_id,
                self.user_id.as_deref(),
                json!({}),
            );
            return;
        }

        self.state = SessionState::Authenticating;
        match self.verifier.verify(token).await {
            Ok(identity) => {
                self.authenticated = true;
                self.user_id = Some(identity.user_id.clone());
                logging::session_event(
                    "session_authenticated",
                    &self.session_id,
                    Some(&identity.user_id),
                    json!({"anonymous": identity.anonymous}),
                );
            }
            Err(e) => {
                logging::session_warn(
                    "authentication_failed",
                    &self.session_id,
                    None,
                    json!({"kind": error_kind(&e)}),
                );
                self.emit(ServerEvent::Error {
                    message: "Authentication failed".into(),
                })
                .await;
                self.state = SessionState::Errored;
                return;
            }
        }

        self.emit_state(ClientSessionState::Connecting).await;
        self.state = SessionState::UpstreamStarting;

        // Bring the upstream channel up off-loop so the inbox stays live:
        // audio arriving before readiness must be rejected, not queued
        // behind the setup wait.
        let factory = Arc::clone(&self.upstream_factory);
        let gate = self.gate.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let mut port = factory(gate);
            let outcome = match port.initialize().await {
                Ok(()) => port.start(&session_config).await,
                Err(e) => Err(e),
            };
            let _ = inbox.send(SessionInput::UpstreamStarted { port, outcome }).await;
        });
    }

    async fn on_upstream_started(
        &mut self,
        port: Box<dyn UpstreamPort>,
        outcome: Result<mpsc::Receiver<UpstreamEvent>, UpstreamError>,
    ) {
        if self.state.is_terminal() || matches!(self.state, SessionState::Stopping) {
            // The session went away while the channel was connecting.
            let mut port = port;
            port.close().await;
            return;
        }

        match outcome {
            Ok(mut events) => {
                self.upstream = Some(port);

                let inbox = self.inbox_tx.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let event = tokio::select! {
                            () = cancel.cancelled() => break,
                            event = events.recv() => event,
                        };
                        let Some(event) = event else { break };
                        if inbox.send(SessionInput::Upstream(event)).await.is_err() {
                            break;
                        }
                    }
                });

                // Safety net: the setup acknowledgement may have raced the
                // event forwarder — the start outcome alone is authoritative.
                self.mark_upstream_ready().await;
            }
            Err(e) => {
                logging::upstream_warn("upstream_start_failed", json!({"error": e.to_string()}));
                self.emit(ServerEvent::Error {
                    message: upstream_user_message(&e).into(),
                })
                .await;
                self.state = SessionState::Errored;
            }
        }
    }

    /// Transition to ready/listening exactly once, and start the fallback
    /// recognizer when configured.
    async fn mark_upstream_ready(&mut self) {
        if self.upstream_ready {
            return;
        }
        self.upstream_ready = true;

        self.state = SessionState::Ready;
        self.emit_state(ClientSessionState::Ready).await;
        self.state = SessionState::Listening;
        self.emit_state(ClientSessionState::Listening).await;

        if self.settings.stt.fallback_enabled {
            if let Some(factory) = self.recognizer_factory.clone() {
                let mut asr = FallbackAsr::new(
                    factory,
                    self.settings.stt.max_retries,
                    self.settings.stt.retry_base,
                );
                let (updates_tx, mut updates_rx) = mpsc::channel(64);
                asr.start(updates_tx);

                let inbox = self.inbox_tx.clone();
                tokio::spawn(async move {
                    while let Some(update) = updates_rx.recv().await {
                        if inbox.send(SessionInput::Asr(update)).await.is_err() {
                            break;
                        }
                    }
                });

                self.asr = Some(asr);
                self.stt_active = true;
                self.transcript_source = TranscriptSource::Stt;
            }
        }

        logging::session_event(
            "upstream_ready",
            &self.session_id,
            self.user_id.as_deref(),
            json!({"stt_active": self.stt_active}),
        );
    }

    async fn on_binary(&mut self, pcm: Vec<u8>) {
        // Sub-sample frames carry no audio; drop silently.
        if pcm.len() < 2 {
            tracing::debug!(bytes = pcm.len(), "Dropping short binary frame");
            return;
        }

        if !self.accepts_audio() {
            let reason = if self.authenticated {
                "vertex_not_ready"
            } else {
                "not_authenticated"
            };
            logging::gateway_warn("binary_audio_rejected", json!({"reason": reason}));
            return;
        }

        let byte_count = pcm.len() as u64;
        if let Some(upstream) = self.upstream.as_mut() {
            if let Err(e) = upstream.send_audio(&pcm).await {
                logging::upstream_warn("audio_forward_failed", json!({"error": e.to_string()}));
                self.emit(ServerEvent::Error {
                    message: "Audio forwarding failed".into(),
                })
                .await;
                return;
            }
        }
        self.counters.in_audio_bytes += byte_count;

        if self.stt_active {
            if let Some(asr) = &self.asr {
                asr.write(&pcm);
            }
        }

        self.state = SessionState::Listening;
        self.emit_state(ClientSessionState::Listening).await;
    }

    async fn on_turn_complete(&mut self) {
        self.emit(ServerEvent::Kpi {
            kind: KpiKind::TurnCompleteReceived,
            at_ms: now_ms(),
        })
        .await;

        if let Some(upstream) = self.upstream.as_mut() {
            if let Err(e) = upstream.send_turn_complete(true).await {
                logging::upstream_warn("turn_complete_failed", json!({"error": e.to_string()}));
                self.emit(ServerEvent::Error {
                    message: "Turn completion failed".into(),
                })
                .await;
            }
        } else {
            logging::session_warn(
                "turn_complete_without_upstream",
                &self.session_id,
                self.user_id.as_deref(),
                json!({}),
            );
        }

        self.first_audio_in_turn = true;
        self.highest_alert_this_turn = None;
    }

    async fn on_barge_in(&mut self, reason: Option<&str>, timestamp: Option<i64>) {
        logging::session_event(
            "barge_in",
            &self.session_id,
            self.user_id.as_deref(),
            json!({"reason": reason.unwrap_or("unspecified")}),
        );

        if let Some(upstream) = self.upstream.as_mut() {
            if let Err(e) = upstream.cancel_output().await {
                // Best effort: forwarding stays off locally even when the
                // upstream cancel could not be delivered.
                self.gate.disable();
                logging::upstream_warn("cancel_output_failed", json!({"error": e.to_string()}));
            }
        } else {
            self.gate.disable();
        }

        self.emit(ServerEvent::BargeInAck {
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
        .await;
        self.state = SessionState::Listening;
        self.emit_state(ClientSessionState::Listening).await;
    }

    async fn on_stop(&mut self) {
        if matches!(
            self.state,
            SessionState::Stopping | SessionState::Closed | SessionState::Errored
        ) {
            // Idempotent: a second stop is a no-op.
            return;
        }
        self.shutdown("client_stop").await;
    }

    // ── Upstream events ────────────────────────────────────────────

    async fn on_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Setup => self.mark_upstream_ready().await,
            UpstreamEvent::Transcript { text, is_partial } => {
                if let Some(event) = self.translator.assistant_transcript(text, is_partial) {
                    self.emit(event).await;
                }
            }
            UpstreamEvent::UserTranscript { text, is_partial } => {
                self.arbitrate_to_upstream().await;
                self.forward_user_transcript(text, is_partial, TranscriptSource::Vertex)
                    .await;
            }
            UpstreamEvent::Audio(pcm) => self.on_model_audio(&pcm).await,
            UpstreamEvent::BargeIn => {
                // The model noticed the user talking over it; the parser has
                // already closed the gate.
                logging::upstream_event("model_interrupted", json!({}));
                self.state = SessionState::Listening;
                self.emit_state(ClientSessionState::Listening).await;
            }
            UpstreamEvent::DraftUpdate(args) => {
                logging::session_event(
                    "draft_updated",
                    &self.session_id,
                    self.user_id.as_deref(),
                    args.clone(),
                );
                self.emit(ServerEvent::DraftUpdate { args }).await;
            }
            UpstreamEvent::NarrativeUpdate(args) => {
                logging::session_event(
                    "narrative_updated",
                    &self.session_id,
                    self.user_id.as_deref(),
                    args.clone(),
                );
                self.emit(ServerEvent::NarrativeUpdate { args }).await;
            }
            UpstreamEvent::Error(message) => {
                logging::upstream_warn("upstream_error", json!({"error": message}));
                self.emit(ServerEvent::Error {
                    message: "Upstream error".into(),
                })
                .await;
            }
            UpstreamEvent::Closed { code, reason } => {
                logging::upstream_event(
                    "upstream_closed",
                    json!({"code": code, "reason": reason}),
                );
                self.shutdown("upstream_closed").await;
            }
        }
    }

    async fn on_model_audio(&mut self, pcm: &[u8]) {
        // Audio that was already queued when the gate closed must not reach
        // the client either.
        if !self.gate.is_enabled() {
            tracing::debug!("Dropping queued model audio — forward gate closed");
            return;
        }

        let event = self.translator.model_audio(pcm);
        self.emit(event).await;
        self.counters.out_audio_chunks += 1;

        if self.first_audio_in_turn {
            self.first_audio_in_turn = false;
            self.emit(ServerEvent::Kpi {
                kind: KpiKind::FirstModelAudio,
                at_ms: now_ms(),
            })
            .await;
        }

        self.state = SessionState::Speaking;
        self.emit_state(ClientSessionState::Speaking).await;
    }

    /// The upstream proved it can transcribe the user: make it authoritative
    /// and mute (optionally tear down) the fallback path.
    async fn arbitrate_to_upstream(&mut self) {
        if self.transcript_source == TranscriptSource::Vertex {
            return;
        }
        self.transcript_source = TranscriptSource::Vertex;
        self.stt_active = false;

        if self.settings.stt.disable_on_vertex {
            if let Some(mut asr) = self.asr.take() {
                self.stt_retry_count = asr.retry_count();
                asr.stop();
            }
        }

        logging::session_event(
            "transcript_source_switched",
            &self.session_id,
            self.user_id.as_deref(),
            json!({"source": self.transcript_source.as_str()}),
        );
    }

    // ── Fallback recognizer updates ────────────────────────────────

    async fn on_asr(&mut self, update: AsrUpdate) {
        match update {
            AsrUpdate::Transcript { text, is_partial } => {
                // Only while the fallback is still the authoritative source.
                if !self.stt_active || self.transcript_source != TranscriptSource::Stt {
                    return;
                }
                self.forward_user_transcript(text, is_partial, TranscriptSource::Stt)
                    .await;
            }
            AsrUpdate::Disabled { retries } => {
                self.stt_active = false;
                self.stt_retry_count = retries;
                self.transcript_source = TranscriptSource::Vertex;
                logging::session_warn(
                    "stt_fallback_disabled",
                    &self.session_id,
                    self.user_id.as_deref(),
                    json!({"retries": retries}),
                );
            }
        }
    }

    // ── Transcript forwarding & safety ─────────────────────────────

    async fn forward_user_transcript(
        &mut self,
        text: String,
        is_partial: bool,
        source: TranscriptSource,
    ) {
        match (source, is_partial) {
            (TranscriptSource::Vertex, true) => self.counters.vertex_partials += 1,
            (TranscriptSource::Vertex, false) => self.counters.vertex_finals += 1,
            (TranscriptSource::Stt, true) => self.counters.stt_partials += 1,
            (TranscriptSource::Stt, false) => self.counters.stt_finals += 1,
        }

        if let Some(verdict) = scan_transcript(&text) {
            let escalates = match self.highest_alert_this_turn {
                None => true,
                Some(Severity::High) => verdict.severity == Severity::Critical,
                Some(Severity::Critical) => false,
            };
            if escalates {
                self.highest_alert_this_turn = Some(verdict.severity);
                self.counters.red_flags += 1;
                match source {
                    TranscriptSource::Vertex => self.emergency.vertex += 1,
                    TranscriptSource::Stt => self.emergency.stt += 1,
                }
                logging::session_warn(
                    "red_flag_detected",
                    &self.session_id,
                    self.user_id.as_deref(),
                    json!({"severity": verdict.severity.as_str(), "source": source.as_str()}),
                );

                self.emit(ServerEvent::TriageEmergency {
                    severity: verdict.severity,
                    banner: verdict.banner,
                })
                .await;
                if verdict.interrupt {
                    self.emit(ServerEvent::AudioStop {
                        reason: "emergency_interrupt".into(),
                    })
                    .await;
                }
            }
        }

        let event = if is_partial {
            ServerEvent::UserTranscriptPartial { text }
        } else {
            ServerEvent::UserTranscriptFinal { text }
        };
        self.emit(event).await;
    }

    // ── Shutdown ───────────────────────────────────────────────────

    async fn shutdown(&mut self, cause: &str) {
        self.state = SessionState::Stopping;
        self.upstream_ready = false;

        self.release_resources().await;

        let metrics = self.metrics_snapshot();
        logging::session_event(
            "session_stopped",
            &self.session_id,
            self.user_id.as_deref(),
            json!({"cause": cause, "metrics": serde_json::to_value(&metrics).unwrap_or_default()}),
        );

        self.emit_state(ClientSessionState::Stopped).await;
        self.state = SessionState::Closed;
    }

    async fn release_resources(&mut self) {
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close().await;
        }
        if let Some(mut asr) = self.asr.take() {
            self.stt_retry_count = asr.retry_count();
            asr.stop();
            self.stt_active = false;
        }
        self.cancel.cancel();
    }

    fn metrics_snapshot(&self) -> SessionMetrics {
        SessionMetrics {
            counters: self.counters,
            stt_retry_count: self
                .asr
                .as_ref()
                .map_or(self.stt_retry_count, FallbackAsr::retry_count),
            transcript_source: self.transcript_source,
            emergency_detections: self.emergency,
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Invariant: audio is accepted only when authenticated, the upstream is
    /// ready, and the session is in a streaming state.
    const fn accepts_audio(&self) -> bool {
        self.authenticated
            && self.upstream_ready
            && matches!(
                self.state,
                SessionState::Ready | SessionState::Listening | SessionState::Speaking
            )
    }

    async fn emit(&mut self, event: ServerEvent) {
        if self.outbound_tx.send(event).await.is_err() {
            tracing::debug!("Outbound queue receiver dropped");
        }
    }

    async fn emit_state(&mut self, state: ClientSessionState) {
        if let Some(event) = self.translator.session_state(state) {
            self.emit(event).await;
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Concise, content-free message for a failed upstream bring-up.
const fn upstream_user_message(error: &UpstreamError) -> &'static str {
    match error {
        UpstreamError::Auth(_) => "Upstream authentication failed",
        UpstreamError::Setup(_) | UpstreamError::SetupTimeout(_) => "Upstream setup failed",
        UpstreamError::Transport(_) | UpstreamError::ChannelClosed => "Upstream unavailable",
    }
}

const fn error_kind(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::InvalidCredential(_) => "invalid_credential",
        GatewayError::Upstream(_) => "upstream",
        GatewayError::Asr(_) => "asr",
        GatewayError::MalformedClientMessage(_) => "malformed_client_message",
        GatewayError::AudioRejected { .. } => "audio_rejected",
        GatewayError::Internal(_) => "internal",
    }
}
