//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Digest generation settings.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Maximum senders named/selected in one digest.
    pub max_senders: usize,
    /// Refuse a second voice digest to the same user within this window
    /// unless the caller forces it.
    pub dedup_window: Duration,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_senders: 5,
            dedup_window: Duration::from_secs(24 * 3600),
        }
    }
}

/// Phone verification settings.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Digits in a one-time code.
    pub code_length: usize,
    /// Absolute session lifetime from code issue.
    pub code_ttl: Duration,
    /// Wrong attempts allowed before the session locks.
    pub max_attempts: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            code_ttl: Duration::from_secs(300), // 5 minutes
            max_attempts: 3,
        }
    }
}

/// Telephony provider (Twilio-shaped) settings.
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    /// Provider account identifier.
    pub account_sid: String,
    /// Provider auth token.
    pub auth_token: SecretString,
    /// Source number for calls and SMS (E.164).
    pub from_number: String,
    /// Source number for WhatsApp (E.164, without the whatsapp: prefix).
    pub whatsapp_from: String,
    /// API base URL (overridable for tests).
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Seconds the outbound call is allowed to ring before giving up.
    pub dial_timeout_secs: u32,
}

impl TelephonyConfig {
    pub fn new(account_sid: String, auth_token: SecretString) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number: String::new(),
            whatsapp_from: String::new(),
            base_url: "https://api.twilio.com".to_string(),
            http_timeout: Duration::from_secs(10),
            dial_timeout_secs: 30,
        }
    }
}

/// Speech synthesis provider settings.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Provider API key.
    pub api_key: SecretString,
    /// API base URL (overridable for tests).
    pub base_url: String,
    /// Voice used when the provider can't be reached or lists nothing.
    pub default_voice_id: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl SpeechConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: "https://api.elevenlabs.io".to_string(),
            default_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}
