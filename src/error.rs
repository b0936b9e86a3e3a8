//! Error types for the concourse core

use thiserror::Error;

/// Result type alias for concourse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the concourse core
///
/// The first block mirrors the wire-level taxonomy: handlers map these
/// variants onto HTTP statuses and realtime error events. The second block
/// wraps library errors; those always surface as `Internal` at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// No credential presented
    #[error("authentication required")]
    AuthRequired,

    /// Credential presented but invalid or expired
    #[error("invalid credential: {0}")]
    AuthInvalid(String),

    /// Authenticated but not allowed
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing entity
    #[error("not found: {0}")]
    NotFound(String),

    /// Request violates an input contract or an invariant
    #[error("invalid: {0}")]
    Invalid(String),

    /// Compare-and-swap failure (handover accept race, consumed upload)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller exceeded budget
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// External provider failed past its deadline; the core degraded
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Channel adapter error
    #[error("channel error: {0}")]
    Channel(String),

    /// Agent invocation error
    #[error("agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Stable machine-readable code for the wire
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::AuthInvalid(_) => "auth_invalid",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Invalid(_) => "invalid",
            Self::Conflict(_) => "conflict",
            Self::RateLimited(_) => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            _ => "internal",
        }
    }

    /// Message safe to show an end user
    ///
    /// Internal variants collapse to a generic string so that stack traces,
    /// provider errors, and identifiers never reach a customer.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthRequired => "authentication required".to_string(),
            Self::AuthInvalid(_) => "invalid credential".to_string(),
            Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Invalid(m)
            | Self::Conflict(m)
            | Self::RateLimited(m)
            | Self::Unavailable(m) => m.clone(),
            _ => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_variants_do_not_leak() {
        let err = Error::Database("constraint violated on messages.id".to_string());
        assert_eq!(err.code(), "internal");
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn taxonomy_codes_are_stable() {
        assert_eq!(Error::AuthRequired.code(), "auth_required");
        assert_eq!(Error::Conflict("x".into()).code(), "conflict");
        assert_eq!(Error::Unavailable("x".into()).code(), "unavailable");
    }
}
