// Access tokens shared with the REST backend. Both sides sign HS256 with the
// same secret and carry `{"user_id", "exp"}`; `iat` is optional.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    exp: i64,
}

/// A verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGrant {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            bail!("jwt secret must be at least {MIN_SECRET_LEN} characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Mints a token the way the REST backend does. Used by tests and tooling.
    pub fn issue_access_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    fn issue_at(&self, user_id: Uuid, issued_at: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: Some(issued_at.timestamp()),
            exp: (issued_at + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign access token")
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<AccessGrant> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .context("access token rejected")?
            .claims;

        let user_id = Uuid::parse_str(&claims.user_id)
            .with_context(|| format!("user_id claim '{}' is not a UUID", claims.user_id))?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .context("exp claim is out of range")?;

        Ok(AccessGrant { user_id, expires_at })
    }

    /// Returns the user id the token was issued for.
    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<Uuid> {
        self.verify(token).map(|grant| grant.user_id)
    }
}
