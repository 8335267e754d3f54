//! Identity verification port and adapters.
//!
//! The gateway treats the bearer token as opaque: the port hands it to a
//! verifier and gets back a user identity or [`GatewayError::InvalidCredential`].
//! Development deployments may short-circuit with well-known mock tokens;
//! that path is config-gated and always logged at warn.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::GatewayError;

/// Identity returned by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub anonymous: bool,
    pub auth_time: Option<DateTime<Utc>>,
}

/// Opaque-token verifier.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate `token` and return the identity behind it.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, GatewayError>;
}

// ── Development mock ───────────────────────────────────────────────

/// Tokens that bypass verification when mock tokens are enabled.
pub const MOCK_TOKENS: &[&str] = &["mock", "mock_token_for_testing", "test_token", "dev_token"];

/// Synthetic identity handed out for mock tokens.
pub const MOCK_USER_ID: &str = "dev-user";

/// Dev-mode verifier: recognizes the mock tokens, delegates everything else
/// to an optional inner verifier.
pub struct MockTokenVerifier {
    inner: Option<Box<dyn IdentityVerifier>>,
}

impl MockTokenVerifier {
    /// Mock tokens only; any other token fails.
    #[must_use]
    pub const fn new() -> Self {
        Self { inner: None }
    }

    /// Mock tokens first, real verification for everything else.
    #[must_use]
    pub fn with_inner(inner: Box<dyn IdentityVerifier>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Default for MockTokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityVerifier for MockTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, GatewayError> {
        if MOCK_TOKENS.contains(&token) {
            tracing::warn!(user_id = MOCK_USER_ID, "Mock token accepted — dev mode only");
            return Ok(VerifiedIdentity {
                user_id: MOCK_USER_ID.to_string(),
                email: None,
                anonymous: true,
                auth_time: Some(Utc::now()),
            });
        }

        match &self.inner {
            Some(inner) => inner.verify(token).await,
            None => Err(GatewayError::InvalidCredential(
                "token is not a recognized mock token".into(),
            )),
        }
    }
}

// ── Identity Toolkit adapter ───────────────────────────────────────

const DEFAULT_LOOKUP_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

/// Verifies Firebase ID tokens against the Identity Toolkit lookup endpoint.
pub struct HttpIdentityVerifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpIdentityVerifier {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_LOOKUP_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Override the lookup endpoint (emulator or test server).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, GatewayError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({"idToken": token}))
            .send()
            .await
            .map_err(|e| GatewayError::InvalidCredential(format!("lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::InvalidCredential(format!(
                "lookup rejected: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidCredential(format!("lookup unparseable: {e}")))?;

        let user = body
            .get("users")
            .and_then(Value::as_array)
            .and_then(|users| users.first())
            .ok_or_else(|| GatewayError::InvalidCredential("no matching account".into()))?;

        let user_id = user
            .get("localId")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidCredential("account without id".into()))?
            .to_string();

        Ok(VerifiedIdentity {
            user_id,
            email: user
                .get("email")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            anonymous: false,
            auth_time: user
                .get("lastLoginAt")
                .and_then(Value::as_str)
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_tokens_yield_dev_user() {
        let verifier = MockTokenVerifier::new();
        for token in MOCK_TOKENS {
            let identity = verifier.verify(token).await.unwrap();
            assert_eq!(identity.user_id, MOCK_USER_ID);
            assert!(identity.anonymous);
        }
    }

    #[tokio::test]
    async fn unknown_token_fails_without_inner() {
        let verifier = MockTokenVerifier::new();
        let err = verifier.verify("eyJhbGciOi...").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn unknown_token_delegates_to_inner() {
        struct AlwaysAda;

        #[async_trait]
        impl IdentityVerifier for AlwaysAda {
            async fn verify(&self, _token: &str) -> Result<VerifiedIdentity, GatewayError> {
                Ok(VerifiedIdentity {
                    user_id: "ada".into(),
                    email: Some("ada@example.com".into()),
                    anonymous: false,
                    auth_time: None,
                })
            }
        }

        let verifier = MockTokenVerifier::with_inner(Box::new(AlwaysAda));
        let identity = verifier.verify("real-token").await.unwrap();
        assert_eq!(identity.user_id, "ada");

        // Mock tokens still short-circuit ahead of the inner verifier.
        let identity = verifier.verify("mock").await.unwrap();
        assert_eq!(identity.user_id, MOCK_USER_ID);
    }
}
