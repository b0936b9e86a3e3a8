//! Credential issuing and verification
//!
//! Users authenticate once with email + password (bcrypt-verified) and
//! receive a bearer credential that embeds the user id and an absolute
//! expiry, signed with HMAC-SHA256. Every realtime connection and HTTP
//! request carries this credential.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies bearer credentials
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    /// # Panics
    ///
    /// Panics if `ttl` exceeds the chrono duration range, which cannot
    /// happen for configured values.
    #[must_use]
    pub fn new(secret: &str, ttl: std::time::Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::from_std(ttl).expect("token ttl in range"),
        }
    }

    /// Issue a bearer credential for a user id
    #[must_use]
    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, Utc::now() + self.ttl)
    }

    fn issue_at(&self, user_id: &str, expires_at: DateTime<Utc>) -> String {
        let payload = format!("{user_id}.{}", expires_at.timestamp());
        let sig = self.sign(payload.as_bytes());
        format!("{payload}.{sig}")
    }

    /// Verify a credential and return the embedded user id
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` on a malformed, tampered, or expired token.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut parts = token.rsplitn(2, '.');
        let sig = parts
            .next()
            .ok_or_else(|| Error::AuthInvalid("malformed token".to_string()))?;
        let payload = parts
            .next()
            .ok_or_else(|| Error::AuthInvalid("malformed token".to_string()))?;

        let expected = self.sign(payload.as_bytes());
        if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            return Err(Error::AuthInvalid("bad signature".to_string()));
        }

        let (user_id, expiry) = payload
            .rsplit_once('.')
            .ok_or_else(|| Error::AuthInvalid("malformed token".to_string()))?;
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| Error::AuthInvalid("malformed expiry".to_string()))?;

        if Utc::now().timestamp() >= expiry {
            return Err(Error::AuthInvalid("token expired".to_string()));
        }

        Ok(user_id.to_string())
    }

    /// Sign arbitrary bytes; also used by the upload broker's presigner
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Hash a password for storage
///
/// # Errors
///
/// Returns error if hashing fails
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Config(format!("password hashing failed: {e}")))
}

/// Verify a password against its stored hash
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
