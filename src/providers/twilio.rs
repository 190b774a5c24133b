//! Twilio-shaped telephony adapter — calls, SMS, and WhatsApp.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::TelephonyConfig;
use crate::error::ProviderError;
use crate::providers::{ProviderRef, TelephonyProvider};

const PROVIDER_NAME: &str = "twilio";

/// Retry hint handed to callers on transient failures. This subsystem
/// never retries on its own.
const RETRY_HINT: Duration = Duration::from_secs(30);

/// Twilio REST adapter.
///
/// Owns one `reqwest::Client`; auth and timeouts come from the injected
/// config, never from ambient state.
pub struct TwilioAdapter {
    config: TelephonyConfig,
    client: reqwest::Client,
}

/// The subset of Twilio's call/message resource we care about.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    sid: String,
    status: String,
}

impl TwilioAdapter {
    pub fn new(config: TelephonyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}.json",
            self.config.base_url, self.config.account_sid
        )
    }

    /// POST a form to the API and parse the created resource.
    async fn post_form(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<ProviderRef, ProviderError> {
        let resp = self
            .client
            .post(self.api_url(resource))
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .timeout(self.config.http_timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER_NAME.into(),
                reason: e.to_string(),
                retry_after: Some(RETRY_HINT),
            })?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable {
                provider: PROVIDER_NAME.into(),
                reason: format!("{status} {body}"),
                retry_after: Some(RETRY_HINT),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: PROVIDER_NAME.into(),
                status: status.as_u16(),
                body,
            });
        }

        let resource: ResourceResponse =
            resp.json().await.map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.into(),
                reason: e.to_string(),
            })?;

        debug!(sid = %resource.sid, status = %resource.status, "Provider accepted request");
        Ok(ProviderRef {
            sid: resource.sid,
            status: resource.status,
        })
    }
}

#[async_trait]
impl TelephonyProvider for TwilioAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn create_call(&self, to: &str, twiml: &str) -> Result<ProviderRef, ProviderError> {
        let timeout = self.config.dial_timeout_secs.to_string();
        self.post_form(
            "Calls",
            &[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Twiml", twiml),
                ("Timeout", timeout.as_str()),
            ],
        )
        .await
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderRef, ProviderError> {
        // WhatsApp traffic must leave from the WhatsApp-enabled number,
        // with the prefix on both sides.
        let from = if to.starts_with("whatsapp:") {
            format!("whatsapp:{}", self.config.whatsapp_from)
        } else {
            self.config.from_number.clone()
        };
        self.post_form("Messages", &[("To", to), ("From", from.as_str()), ("Body", body)])
            .await
    }
}
