//! Environment-driven gateway configuration.
//!
//! Every knob has a documented default; unknown values fall back to it.
//! `Settings::from_env` is called once at startup by the composition root —
//! a missing required variable is a fatal startup error (process exit 1).

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Default WebSocket listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default Vertex AI region.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Default Gemini Live model id.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-preview-04-09";

/// Default prebuilt voice for model audio.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Default cap on fallback recognizer restart attempts.
pub const DEFAULT_STT_MAX_RETRIES: u32 = 5;

/// Default base delay for the fallback recognizer backoff schedule.
pub const DEFAULT_STT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Deployment mode, from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Pretty logs, debug level, mock tokens allowed by default.
    #[default]
    Development,
    /// Line-delimited JSON logs, info level, mock tokens refused by default.
    Production,
}

impl RunMode {
    fn from_env() -> Self {
        match env::var("NODE_ENV").as_deref() {
            Ok("production") => Self::Production,
            _ => Self::Development,
        }
    }

    /// Whether this is a production deployment.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// WebSocket origin policy, from `ALLOWED_ORIGINS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Accept any origin (development default).
    #[default]
    Any,
    /// Accept only the listed origins.
    List(Vec<String>),
}

impl AllowedOrigins {
    fn from_env() -> Self {
        match env::var("ALLOWED_ORIGINS") {
            Ok(raw) if raw.trim() != "*" && !raw.trim().is_empty() => Self::List(
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => Self::Any,
        }
    }
}

/// Upstream model channel settings.
#[derive(Debug, Clone)]
pub struct VertexSettings {
    /// GCP project hosting the Vertex AI endpoint. Required.
    pub project_id: String,
    /// Vertex AI region.
    pub location: String,
    /// Gemini Live model id.
    pub model: String,
    /// Prebuilt voice name for audio responses.
    pub voice: String,
    /// Optional system instruction prepended to the session.
    pub system_instruction: Option<String>,
}

/// Fallback recognizer settings.
#[derive(Debug, Clone)]
pub struct SttSettings {
    /// Whether the fallback transcript path runs at all.
    pub fallback_enabled: bool,
    /// Tear the recognizer down once the upstream proves it can transcribe.
    pub disable_on_vertex: bool,
    /// Streaming recognizer endpoint; fallback stays off when unset.
    pub endpoint: Option<String>,
    /// API key for the recognizer endpoint.
    pub api_key: Option<String>,
    /// Restart attempts before the fallback path gives up for the session.
    pub max_retries: u32,
    /// Base delay for the exponential backoff schedule.
    pub retry_base: Duration,
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen port for the WebSocket server.
    pub port: u16,
    /// Deployment mode.
    pub run_mode: RunMode,
    /// Origin policy for WebSocket upgrades.
    pub allowed_origins: AllowedOrigins,
    /// Upstream model channel settings.
    pub vertex: VertexSettings,
    /// Accept the well-known mock tokens instead of verifying.
    pub allow_mock_tokens: bool,
    /// Fallback recognizer settings.
    pub stt: SttSettings,
    /// Emit assistant partial transcripts (finals are always emitted).
    pub assistant_emit_partials: bool,
    /// Web API key for the identity verifier adapter.
    pub firebase_web_api_key: Option<String>,
    /// Static bearer token overriding the upstream credential chain.
    pub google_access_token: Option<String>,
}

impl Settings {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = RunMode::from_env();

        let project_id = env::var("VERTEX_AI_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingRequired("VERTEX_AI_PROJECT_ID"))?;

        Ok(Self {
            port: parse_or("PORT", DEFAULT_PORT)?,
            run_mode,
            allowed_origins: AllowedOrigins::from_env(),
            vertex: VertexSettings {
                project_id,
                location: string_or("VERTEX_AI_LOCATION", DEFAULT_LOCATION),
                model: string_or("VERTEX_AI_MODEL", DEFAULT_MODEL),
                voice: string_or("VOICE_NAME", DEFAULT_VOICE),
                system_instruction: env::var("SYSTEM_INSTRUCTION").ok().filter(|v| !v.is_empty()),
            },
            // Mock tokens default to the run mode: on for dev, off for prod.
            allow_mock_tokens: flag_or("ALLOW_MOCK_TOKENS", !run_mode.is_production()),
            stt: SttSettings {
                fallback_enabled: flag_or("STT_FALLBACK_ENABLED", true),
                disable_on_vertex: flag_or("STT_DISABLE_ON_VERTEX", true),
                endpoint: env::var("STT_ENDPOINT").ok().filter(|v| !v.is_empty()),
                api_key: env::var("STT_API_KEY").ok().filter(|v| !v.is_empty()),
                max_retries: parse_or("STT_MAX_RETRIES", DEFAULT_STT_MAX_RETRIES)?,
                retry_base: Duration::from_millis(parse_or(
                    "STT_RETRY_BASE_MS",
                    u64::try_from(DEFAULT_STT_RETRY_BASE.as_millis()).unwrap_or(500),
                )?),
            },
            assistant_emit_partials: flag_or("ASSISTANT_EMIT_PARTIALS", false),
            firebase_web_api_key: env::var("FIREBASE_WEB_API_KEY").ok().filter(|v| !v.is_empty()),
            google_access_token: env::var("GOOGLE_ACCESS_TOKEN").ok().filter(|v| !v.is_empty()),
        })
    }

    /// Construct settings with documented defaults and a given project id,
    /// bypassing the environment. Used by tests and embedding callers.
    #[must_use]
    pub fn with_defaults(project_id: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            run_mode: RunMode::Development,
            allowed_origins: AllowedOrigins::Any,
            vertex: VertexSettings {
                project_id: project_id.into(),
                location: DEFAULT_LOCATION.to_string(),
                model: DEFAULT_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: None,
            },
            allow_mock_tokens: true,
            stt: SttSettings {
                fallback_enabled: true,
                disable_on_vertex: true,
                endpoint: None,
                api_key: None,
                max_retries: DEFAULT_STT_MAX_RETRIES,
                retry_base: DEFAULT_STT_RETRY_BASE,
            },
            assistant_emit_partials: false,
            firebase_web_api_key: None,
            google_access_token: None,
        }
    }
}

/// Read an env var and parse it, falling back to `default` when absent and
/// failing loudly when present but unparseable.
fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Boolean flags accept `1/0`, `true/false`, `yes/no`, `on/off` in any
/// case; anything else takes the documented default.
fn flag_or(key: &str, default: bool) -> bool {
    match env::var(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Ok("1" | "true" | "yes" | "on") => true,
        Ok("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let settings = Settings::with_defaults("demo-project");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.vertex.location, "us-central1");
        assert!(settings.stt.fallback_enabled);
        assert!(settings.stt.disable_on_vertex);
        assert!(!settings.assistant_emit_partials);
        assert_eq!(settings.stt.max_retries, 5);
        assert_eq!(settings.stt.retry_base, Duration::from_millis(500));
    }

    #[test]
    fn dev_mode_allows_mock_tokens_by_default() {
        let settings = Settings::with_defaults("demo-project");
        assert!(!settings.run_mode.is_production());
        assert!(settings.allow_mock_tokens);
    }

    #[test]
    fn origin_list_default_is_any() {
        assert_eq!(AllowedOrigins::default(), AllowedOrigins::Any);
    }
}
