// Connection gateway: resolves who is on the other end of a socket before it
// is allowed anywhere near a room.

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde_json::json;
use socialnet_common::protocol::ws::ErrorType;
use subtle::ConstantTimeEq;
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth::{extract_bearer_token, jwt::JwtAccessTokenService};
use crate::error::RelayError;
use crate::store::SocialStore;

/// The resolved principal of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    User { id: Uuid },
    /// The publish bridge, authenticated with the shared socket secret.
    InternalPublisher,
    Unauthenticated,
}

impl Identity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { id } => Some(*id),
            Self::InternalPublisher | Self::Unauthenticated => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InternalPublisher)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::InternalPublisher => "internal",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorReason {
    Missing,
    InvalidOrExpired,
}

impl AuthErrorReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::InvalidOrExpired => "invalid_or_expired",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::Missing => "Auth bearer not set",
            Self::InvalidOrExpired => "Auth token is invalid or expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError {
    pub reason: AuthErrorReason,
}

impl AuthError {
    pub fn to_relay_error(self) -> RelayError {
        RelayError::new(ErrorType::Auth, self.reason.message())
            .with_data(json!({ "reason": self.reason.as_str() }))
    }
}

#[derive(Clone)]
pub struct Gateway {
    jwt_service: Arc<JwtAccessTokenService>,
    socket_secret: Arc<str>,
    store: SocialStore,
}

impl Gateway {
    pub fn new(
        jwt_service: Arc<JwtAccessTokenService>,
        socket_secret: impl Into<Arc<str>>,
        store: SocialStore,
    ) -> Self {
        Self { jwt_service, socket_secret: socket_secret.into(), store }
    }

    /// Never fails outright: an unauthenticated identity comes back together
    /// with the reason, so the caller can report it on the accepted socket.
    pub async fn authenticate(&self, headers: &HeaderMap) -> (Identity, Option<AuthError>) {
        let Some(raw) = headers.get(AUTHORIZATION) else {
            return unauthenticated(AuthErrorReason::Missing);
        };
        // Present but not visible ASCII: cannot be the secret or a token.
        let Ok(value) = raw.to_str() else {
            return unauthenticated(AuthErrorReason::InvalidOrExpired);
        };
        if value.trim().is_empty() {
            return unauthenticated(AuthErrorReason::Missing);
        }

        if self.is_socket_secret(value) {
            return (Identity::InternalPublisher, None);
        }

        let Some(token) = extract_bearer_token(value) else {
            return unauthenticated(AuthErrorReason::InvalidOrExpired);
        };

        let user_id = match self.jwt_service.validate_access_token(token) {
            Ok(user_id) => user_id,
            Err(error) => {
                debug!(error = %error, "rejected websocket access token");
                return unauthenticated(AuthErrorReason::InvalidOrExpired);
            }
        };

        match self.store.has_active_session(user_id).await {
            Ok(true) => (Identity::User { id: user_id }, None),
            Ok(false) => {
                debug!(user_id = %user_id, "access token has no active session");
                unauthenticated(AuthErrorReason::InvalidOrExpired)
            }
            Err(error) => {
                error!(error = ?error, user_id = %user_id, "failed to look up access session");
                unauthenticated(AuthErrorReason::InvalidOrExpired)
            }
        }
    }

    fn is_socket_secret(&self, value: &str) -> bool {
        value.as_bytes().ct_eq(self.socket_secret.as_bytes()).into()
    }
}

fn unauthenticated(reason: AuthErrorReason) -> (Identity, Option<AuthError>) {
    (Identity::Unauthenticated, Some(AuthError { reason }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;

    const TEST_JWT_SECRET: &str = "socialnet_test_secret_that_is_definitely_long_enough";
    const TEST_SOCKET_SECRET: &str = "test-socket-secret";

    fn gateway(memory: &MemoryStore) -> (Gateway, Arc<JwtAccessTokenService>) {
        let jwt = Arc::new(JwtAccessTokenService::new(TEST_JWT_SECRET).expect("jwt service"));
        let gateway =
            Gateway::new(Arc::clone(&jwt), TEST_SOCKET_SECRET, SocialStore::Memory(memory.clone()));
        (gateway, jwt)
    }

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).expect("header"));
        headers
    }

    #[tokio::test]
    async fn missing_header_is_reported_as_missing() {
        let (gateway, _) = gateway(&MemoryStore::default());
        let (identity, error) = gateway.authenticate(&HeaderMap::new()).await;

        assert_eq!(identity, Identity::Unauthenticated);
        assert_eq!(error.map(|e| e.reason), Some(AuthErrorReason::Missing));
    }

    #[tokio::test]
    async fn exact_socket_secret_is_the_internal_publisher() {
        let (gateway, _) = gateway(&MemoryStore::default());

        let (identity, error) = gateway.authenticate(&headers(TEST_SOCKET_SECRET)).await;
        assert_eq!(identity, Identity::InternalPublisher);
        assert!(error.is_none());

        let (identity, _) = gateway.authenticate(&headers("test-socket-secre")).await;
        assert_eq!(identity, Identity::Unauthenticated);
    }

    #[tokio::test]
    async fn valid_token_with_active_session_resolves_user() {
        let memory = MemoryStore::default();
        let (gateway, jwt) = gateway(&memory);
        let user_id = Uuid::new_v4();
        memory.open_session(user_id).await;
        let token = jwt.issue_access_token(user_id).expect("token");

        let (identity, error) = gateway.authenticate(&headers(&format!("Bearer {token}"))).await;

        assert_eq!(identity, Identity::User { id: user_id });
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn revoked_session_is_invalid_or_expired() {
        let memory = MemoryStore::default();
        let (gateway, jwt) = gateway(&memory);
        let token = jwt.issue_access_token(Uuid::new_v4()).expect("token");

        let (identity, error) = gateway.authenticate(&headers(&format!("Bearer {token}"))).await;

        assert_eq!(identity, Identity::Unauthenticated);
        assert_eq!(error.map(|e| e.reason), Some(AuthErrorReason::InvalidOrExpired));
    }

    #[tokio::test]
    async fn non_ascii_header_is_invalid_rather_than_missing() {
        let memory = MemoryStore::default();
        let (gateway, _) = gateway(&memory);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xff\xfe").expect("obs-text header"),
        );

        let (identity, error) = gateway.authenticate(&headers).await;
        assert_eq!(identity, Identity::Unauthenticated);
        assert_eq!(error.expect("auth error").reason, AuthErrorReason::InvalidOrExpired);
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_or_expired() {
        let (gateway, _) = gateway(&MemoryStore::default());
        for value in ["Bearer not-a-jwt", "Token abc", "Bearer"] {
            let (identity, error) = gateway.authenticate(&headers(value)).await;
            assert_eq!(identity, Identity::Unauthenticated, "{value}");
            assert_eq!(error.map(|e| e.reason), Some(AuthErrorReason::InvalidOrExpired));
        }
    }

    #[test]
    fn auth_error_frame_carries_reason() {
        let frame = AuthError { reason: AuthErrorReason::Missing }.to_relay_error().to_frame();
        let value = serde_json::to_value(frame).expect("frame should serialize");

        assert_eq!(value["type"], "auth");
        assert_eq!(value["message"], "Auth bearer not set");
        assert_eq!(value["data"]["reason"], "missing");
    }
}
