//! Shared application state for the Axum adapter.

use std::sync::Arc;

use voicegate_core::config::Settings;
use voicegate_core::identity::IdentityVerifier;
use voicegate_core::ports::{RecognizerFactory, UpstreamFactory};

/// Everything a session needs, assembled once at startup by the
/// composition root and cloned per connection.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub upstream_factory: UpstreamFactory,
    pub recognizer_factory: Option<RecognizerFactory>,
}
