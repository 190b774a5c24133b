//! ElevenLabs-shaped speech synthesis adapter.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::SpeechConfig;
use crate::error::ProviderError;
use crate::providers::{SpeechProvider, Voice};

const PROVIDER_NAME: &str = "elevenlabs";

/// ElevenLabs REST adapter. Only the voice catalog is consumed here —
/// synthesis itself happens provider-side during the call.
pub struct ElevenLabsAdapter {
    config: SpeechConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<VoiceEntry>,
}

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    voice_id: String,
    name: String,
}

impl ElevenLabsAdapter {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// The fallback voice used when the catalog can't be fetched.
    pub fn default_voice_id(&self) -> &str {
        &self.config.default_voice_id
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, ProviderError> {
        let url = format!("{}/v1/voices", self.config.base_url);
        let resp = self
            .client
            .get(url)
            .header("xi-api-key", self.config.api_key.expose_secret())
            .timeout(self.config.http_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER_NAME.into(),
                reason: e.to_string(),
                retry_after: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: PROVIDER_NAME.into(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: VoicesResponse =
            resp.json().await.map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.into(),
                reason: e.to_string(),
            })?;

        Ok(parsed
            .voices
            .into_iter()
            .map(|v| Voice {
                id: v.voice_id,
                name: v.name,
            })
            .collect())
    }
}
