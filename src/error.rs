//! Error types for Inbox Courier.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Phone verification errors — all user-correctable, surfaced verbatim.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("No verification in progress for this number")]
    NoSession,

    #[error("The code has expired, request a new one")]
    CodeExpired,

    #[error("That code doesn't match, {remaining} attempts left")]
    CodeMismatch { remaining: u32 },

    #[error("Too many wrong attempts, request a new code")]
    TooManyAttempts,

    #[error("This number is already verified")]
    AlreadyVerified,
}

impl VerifyError {
    /// Stable user-facing reason string for the API layer.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::CodeExpired => "code_expired",
            Self::CodeMismatch { .. } => "code_mismatch",
            Self::TooManyAttempts => "too_many_attempts",
            Self::AlreadyVerified => "already_verified",
        }
    }
}

/// Dispatch-time errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Destination {destination} is not verified for channel {channel}")]
    NotVerified {
        destination: String,
        channel: String,
    },

    #[error("Malformed destination {destination}: {reason}")]
    MalformedDestination {
        destination: String,
        reason: String,
    },
}

impl DispatchError {
    /// Stable user-facing reason string for the API layer.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotVerified { .. } => "not_verified",
            Self::MalformedDestination { .. } => "malformed_destination",
        }
    }
}

/// External provider errors — transient, safe to retry after backoff.
///
/// This subsystem never retries automatically; the retry hint is
/// surfaced to the caller instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} unavailable: {reason} (retry after {retry_after:?})")]
    Unavailable {
        provider: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} rejected the request: {status} {body}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Provider {provider} returned an unreadable response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ProviderError {
    /// Name of the provider that failed.
    pub fn provider(&self) -> &str {
        match self {
            Self::Unavailable { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
