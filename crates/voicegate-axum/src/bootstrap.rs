//! Server bootstrap - the composition root.
//!
//! This is the ONLY place where infrastructure is wired together: identity
//! verifier selection (mock vs HTTP), the upstream channel factory, the
//! fallback recognizer factory, and the listener with its graceful
//! SIGINT/SIGTERM drain.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio::net::TcpListener;

use voicegate_core::config::Settings;
use voicegate_core::identity::{HttpIdentityVerifier, IdentityVerifier, MockTokenVerifier};
use voicegate_core::logging;
use voicegate_stt::ws_recognizer_factory;
use voicegate_upstream::live_session_factory;

use crate::routes;
use crate::state::AppState;

/// Assemble the shared state from configuration.
pub fn build_state(settings: Settings) -> Result<AppState> {
    let settings = Arc::new(settings);

    let verifier: Arc<dyn IdentityVerifier> = if settings.allow_mock_tokens {
        if settings.run_mode.is_production() {
            tracing::warn!("Mock tokens are enabled in production mode");
        }
        match &settings.firebase_web_api_key {
            Some(key) => Arc::new(MockTokenVerifier::with_inner(Box::new(
                HttpIdentityVerifier::new(key.clone()),
            ))),
            None => Arc::new(MockTokenVerifier::new()),
        }
    } else {
        let key = settings.firebase_web_api_key.clone();
        let Some(key) = key else {
            bail!("FIREBASE_WEB_API_KEY is required when mock tokens are disabled");
        };
        Arc::new(HttpIdentityVerifier::new(key))
    };

    let upstream_factory = live_session_factory(&settings);
    let recognizer_factory = if settings.stt.fallback_enabled {
        ws_recognizer_factory(&settings.stt)
    } else {
        None
    };

    if settings.stt.fallback_enabled && recognizer_factory.is_none() {
        tracing::info!("No STT endpoint configured — fallback transcription is off");
    }

    Ok(AppState {
        settings,
        verifier,
        upstream_factory,
        recognizer_factory,
    })
}

/// Bind the listener and serve until a shutdown signal arrives, then stop
/// accepting and wait for in-flight sessions to drain.
pub async fn start_server(settings: Settings) -> Result<()> {
    let port = settings.port;
    let state = build_state(settings)?;
    let app = routes::create_router(state);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("could not bind port {port}"))?;

    logging::gateway_event("listening", json!({"port": port}));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    logging::gateway_event("drained", json!({}));
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    logging::gateway_event("shutdown_signal", json!({}));
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicegate_core::config::RunMode;

    #[test]
    fn dev_settings_build_with_mock_verifier() {
        let state = build_state(Settings::with_defaults("demo-project")).unwrap();
        assert!(state.settings.allow_mock_tokens);
        // No STT endpoint configured, so the fallback factory is absent.
        assert!(state.recognizer_factory.is_none());
    }

    #[test]
    fn production_without_identity_key_is_a_startup_error() {
        let mut settings = Settings::with_defaults("demo-project");
        settings.run_mode = RunMode::Production;
        settings.allow_mock_tokens = false;
        settings.firebase_web_api_key = None;

        assert!(build_state(settings).is_err());
    }

    #[test]
    fn stt_endpoint_enables_the_fallback_factory() {
        let mut settings = Settings::with_defaults("demo-project");
        settings.stt.endpoint = Some("wss://stt.example.com/v1/listen".into());

        let state = build_state(settings).unwrap();
        assert!(state.recognizer_factory.is_some());
    }
}
