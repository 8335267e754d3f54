//! Fallback ASR supervisor.
//!
//! Owns the recognizer stream lifecycle for one session: open, pump events,
//! reconnect with exponential backoff on failure, reset the retry counter on
//! the first successful transcript of a stream, and give up (with a terminal
//! notice) once `max_retries` is exhausted. The coordinator tees audio in
//! through [`FallbackAsr::write`] and receives [`AsrUpdate`]s on the channel
//! it handed to [`FallbackAsr::start`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicegate_core::ports::{RecognizerEvent, RecognizerFactory};

/// What the supervisor reports to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrUpdate {
    /// A transcript from the fallback recognizer.
    Transcript { text: String, is_partial: bool },
    /// Retries exhausted; the fallback path is off for the rest of the
    /// session.
    Disabled { retries: u32 },
}

/// Per-session fallback recognizer with retry supervision.
pub struct FallbackAsr {
    factory: RecognizerFactory,
    max_retries: u32,
    retry_base: Duration,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    cancel: CancellationToken,
    retry_count: Arc<AtomicU32>,
    active: Arc<AtomicBool>,
}

impl FallbackAsr {
    #[must_use]
    pub fn new(factory: RecognizerFactory, max_retries: u32, retry_base: Duration) -> Self {
        Self {
            factory,
            max_retries,
            retry_base,
            audio_tx: None,
            cancel: CancellationToken::new(),
            retry_count: Arc::new(AtomicU32::new(0)),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the supervisor. Updates flow into `updates`; audio written via
    /// [`write`](Self::write) is forwarded to whichever stream is live.
    pub fn start(&mut self, updates: mpsc::Sender<AsrUpdate>) {
        if self.audio_tx.is_some() {
            tracing::warn!("Fallback recognizer already started");
            return;
        }

        // ~4 s of 30 ms frames; overflow drops rather than back-pressuring
        // the audio path while a reconnect is in flight.
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(128);
        self.audio_tx = Some(audio_tx);
        self.active.store(true, Ordering::SeqCst);

        tokio::spawn(supervise(
            Arc::clone(&self.factory),
            self.max_retries,
            self.retry_base,
            audio_rx,
            updates,
            self.cancel.clone(),
            Arc::clone(&self.retry_count),
            Arc::clone(&self.active),
        ));
    }

    /// Tee one audio chunk into the recognizer. No-op when not started;
    /// drops the chunk (with a warn) when the buffer is full.
    pub fn write(&self, pcm: &[u8]) {
        let Some(tx) = &self.audio_tx else { return };
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        match tx.try_send(pcm.to_vec()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Fallback audio buffer full — dropping chunk");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Stop the supervisor and close any live stream. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.audio_tx.take();
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether the supervisor is running and has not exhausted retries.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Restart attempts so far (for session metrics).
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }
}

impl Drop for FallbackAsr {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The supervisor loop: one iteration per stream attempt.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    factory: RecognizerFactory,
    max_retries: u32,
    retry_base: Duration,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    updates: mpsc::Sender<AsrUpdate>,
    cancel: CancellationToken,
    retry_count: Arc<AtomicU32>,
    active: Arc<AtomicBool>,
) {
    let mut retry: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut recognizer = factory();
        match recognizer.open().await {
            Ok(mut events) => {
                tracing::info!(attempt = retry, "Fallback recognizer stream open");
                let mut had_transcript = false;

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            recognizer.finish().await;
                            return;
                        }
                        pcm = audio_rx.recv() => match pcm {
                            Some(pcm) => {
                                if let Err(e) = recognizer.write(&pcm).await {
                                    tracing::warn!(error = %e, "Fallback audio write failed");
                                    break;
                                }
                            }
                            // Audio sender dropped — the session is tearing down.
                            None => {
                                recognizer.finish().await;
                                return;
                            }
                        },
                        event = events.recv() => match event {
                            Some(RecognizerEvent::Transcript { text, is_partial }) => {
                                if !had_transcript {
                                    had_transcript = true;
                                    retry = 0;
                                    retry_count.store(0, Ordering::SeqCst);
                                }
                                if updates
                                    .send(AsrUpdate::Transcript { text, is_partial })
                                    .await
                                    .is_err()
                                {
                                    recognizer.finish().await;
                                    return;
                                }
                            }
                            Some(RecognizerEvent::Error(e)) => {
                                tracing::warn!(error = %e, "Fallback recognizer stream error");
                                break;
                            }
                            Some(RecognizerEvent::Closed) | None => break,
                        },
                    }
                }

                recognizer.finish().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = retry, "Fallback recognizer connect failed");
            }
        }

        // Stream attempt over — schedule the next one or give up.
        if retry >= max_retries {
            tracing::warn!(retries = retry, "Fallback recognizer retries exhausted — disabling");
            active.store(false, Ordering::SeqCst);
            let _ = updates.send(AsrUpdate::Disabled { retries: retry }).await;
            return;
        }

        let delay = retry_base * 2u32.saturating_pow(retry);
        retry += 1;
        retry_count.store(retry, Ordering::SeqCst);
        tracing::info!(attempt = retry, ?delay, "Fallback recognizer backoff");

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use std::sync::Mutex;
    use voicegate_core::error::AsrError;
    use voicegate_core::ports::StreamingRecognizer;

    /// Scripted recognizer: each factory call pops the next script entry.
    enum Script {
        /// open() fails.
        ConnectFail,
        /// open() succeeds and replays these events, then closes.
        Events(Vec<RecognizerEvent>),
    }

    struct ScriptedRecognizer {
        script: Option<Script>,
    }

    #[async_trait]
    impl StreamingRecognizer for ScriptedRecognizer {
        async fn open(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>, AsrError> {
            match self.script.take() {
                Some(Script::ConnectFail) | None => {
                    Err(AsrError::Connect("scripted failure".into()))
                }
                Some(Script::Events(events)) => {
                    let (tx, rx) = mpsc::channel(16);
                    tokio::spawn(async move {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        let _ = tx.send(RecognizerEvent::Closed).await;
                    });
                    Ok(rx)
                }
            }
        }

        async fn write(&mut self, _pcm: &[u8]) -> Result<(), AsrError> {
            Ok(())
        }

        async fn finish(&mut self) {}
    }

    fn scripted_factory(scripts: Vec<Script>) -> RecognizerFactory {
        let scripts = Arc::new(Mutex::new(scripts));
        Arc::new(move || {
            let script = scripts.lock().unwrap().pop();
            Box::new(ScriptedRecognizer { script })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_emit_disabled_with_count() {
        // Every connect fails; max_retries = 3.
        let factory = scripted_factory(vec![
            Script::ConnectFail,
            Script::ConnectFail,
            Script::ConnectFail,
            Script::ConnectFail,
        ]);
        let mut asr = FallbackAsr::new(factory, 3, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(16);
        asr.start(tx);

        let update = rx.recv().await.unwrap();
        assert_eq!(update, AsrUpdate::Disabled { retries: 3 });
        assert_eq!(asr.retry_count(), 3);
        assert!(!asr.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn transcripts_flow_through() {
        // Scripts pop from the back: first attempt emits two transcripts.
        let factory = scripted_factory(vec![
            Script::ConnectFail,
            Script::Events(vec![
                RecognizerEvent::Transcript {
                    text: "hel".into(),
                    is_partial: true,
                },
                RecognizerEvent::Transcript {
                    text: "hello".into(),
                    is_partial: false,
                },
            ]),
        ]);
        let mut asr = FallbackAsr::new(factory, 1, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(16);
        asr.start(tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            AsrUpdate::Transcript {
                text: "hel".into(),
                is_partial: true
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            AsrUpdate::Transcript {
                text: "hello".into(),
                is_partial: false
            }
        );
        // The first transcript reset the counter.
        assert_eq!(asr.retry_count(), 0);

        // The stream then closes; the single remaining attempt fails and the
        // supervisor gives up after one recorded retry.
        assert_eq!(rx.recv().await.unwrap(), AsrUpdate::Disabled { retries: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn first_transcript_resets_retry_counter() {
        let factory = scripted_factory(vec![
            Script::Events(vec![RecognizerEvent::Transcript {
                text: "ok".into(),
                is_partial: false,
            }]),
            Script::ConnectFail,
        ]);
        let mut asr = FallbackAsr::new(factory, 5, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(16);
        asr.start(tx);

        // First attempt fails (counter 1), second succeeds and resets to 0.
        let update = rx.recv().await.unwrap();
        assert_eq!(
            update,
            AsrUpdate::Transcript {
                text: "ok".into(),
                is_partial: false
            }
        );
        assert_eq!(asr.retry_count(), 0);
    }

    #[tokio::test]
    async fn write_before_start_is_a_no_op() {
        let factory = scripted_factory(vec![]);
        let asr = FallbackAsr::new(factory, 1, Duration::from_millis(10));
        asr.write(&[0u8; 640]); // must not panic or block
        assert_eq!(asr.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_supervisor() {
        let factory = scripted_factory(vec![Script::ConnectFail, Script::ConnectFail]);
        let mut asr = FallbackAsr::new(factory, 100, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(16);
        asr.start(tx);
        asr.stop();
        assert!(!asr.is_active());
        // No Disabled notice after stop — the channel just closes.
        assert_eq!(rx.recv().await, None);
    }
}
