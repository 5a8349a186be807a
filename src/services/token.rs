//! Signed session tokens.
//!
//! Stateless HS256 JWTs. Validity is fixed at issuance; there is no refresh
//! and no revocation list, so a token stays good until it expires.

use anyhow::{Result, bail};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::repositories::user::{Role, User};

/// Minimum length for the symmetric signing key. Startup fails below this.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i32,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_minutes: i64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Result<Self> {
        if secret.len() < MIN_SECRET_BYTES {
            bail!("Session secret must be at least {MIN_SECRET_BYTES} bytes");
        }
        if ttl_minutes <= 0 {
            bail!("Session TTL must be positive");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; the default 60s leeway would keep dead tokens alive.
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_minutes,
        })
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl_minutes * 60,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("Failed to sign session token: {e}"))
    }

    /// Verify a token. Malformed input, a bad signature, and expiry are all
    /// the same answer for callers; only the debug log tells them apart.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Rejected session token: {e}");
                None
            }
        }
    }
}
