//! Provider adapters — pure I/O seams, no business logic.
//!
//! Adapters wrap the external telephony and speech-synthesis services
//! behind small async traits so the dispatcher and verification manager
//! never touch HTTP directly. Configuration is injected at
//! construction; there is no ambient provider state.

pub mod elevenlabs;
pub mod twilio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use elevenlabs::ElevenLabsAdapter;
pub use twilio::TwilioAdapter;

/// Provider-assigned handle for one placed call or sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRef {
    /// Provider reference id (e.g. a call or message SID).
    pub sid: String,
    /// Raw initial status string as the provider reported it.
    pub status: String,
}

/// Voice/SMS/WhatsApp transport.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Place an outbound call that plays the given speakable markup.
    ///
    /// Returns as soon as the provider accepts the request — call
    /// completion is asynchronous and arrives via status callback.
    async fn create_call(&self, to: &str, twiml: &str) -> Result<ProviderRef, ProviderError>;

    /// Send a single text message. WhatsApp destinations carry the
    /// `whatsapp:` prefix; plain E.164 goes out as SMS.
    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderRef, ProviderError>;
}

/// An available synthesis voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    /// Provider voice identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// Speech synthesis provider.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// List the voices available to this account.
    async fn list_voices(&self) -> Result<Vec<Voice>, ProviderError>;
}
