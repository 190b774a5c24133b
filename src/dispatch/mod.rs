//! Channel dispatch — delivering one digest over one channel.

pub mod model;

pub use model::{Channel, NotificationRecord, NotificationStatus};

use std::sync::Arc;

use tracing::{info, warn};

use crate::digest::DigestScript;
use crate::error::{DispatchError, Error, ProviderError, Result};
use crate::phone::require_e164;
use crate::providers::{ProviderRef, SpeechProvider, TelephonyProvider};
use crate::store::Database;
use crate::verify::VerificationSessionManager;

/// WhatsApp message bodies are kept under this length.
const WHATSAPP_MAX_BODY: usize = 1500;

/// Dispatches a digest script to a verified destination.
///
/// One handler per channel variant behind a single entry point; no
/// runtime type inspection. Every attempt that reaches the provider
/// leaves exactly one notification record, so dispatch history is
/// complete for auditing and for the caller's already-called-today
/// dedup. Failed dispatches are never retried here; retry is the
/// caller's decision.
pub struct ChannelDispatcher {
    db: Arc<dyn Database>,
    telephony: Arc<dyn TelephonyProvider>,
    speech: Arc<dyn SpeechProvider>,
    verifier: Arc<VerificationSessionManager>,
    default_voice_id: String,
}

impl ChannelDispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        telephony: Arc<dyn TelephonyProvider>,
        speech: Arc<dyn SpeechProvider>,
        verifier: Arc<VerificationSessionManager>,
        default_voice_id: String,
    ) -> Self {
        Self {
            db,
            telephony,
            speech,
            verifier,
            default_voice_id,
        }
    }

    /// Deliver `script` to `destination` over `channel`.
    ///
    /// Preconditions, checked before any side effect: the destination is
    /// strict E.164, and it holds a verified session for this user
    /// (WhatsApp piggybacks on the same verified bare number). Failing
    /// either writes nothing. After the preconditions, a provider
    /// failure writes one record with status `Failed` and no reference
    /// id, then surfaces the provider error with its retry hint.
    pub async fn dispatch(
        &self,
        user_id: &str,
        destination: &str,
        channel: Channel,
        script: &DigestScript,
        voice_override: Option<&str>,
    ) -> Result<NotificationRecord> {
        require_e164(destination).map_err(Error::Dispatch)?;

        if !self.verifier.is_verified(user_id, destination).await {
            return Err(Error::Dispatch(DispatchError::NotVerified {
                destination: destination.to_string(),
                channel: channel.to_string(),
            }));
        }

        let attempt = match channel {
            Channel::Voice => self.place_call(destination, script, voice_override).await,
            Channel::Sms => self.telephony.send_message(destination, &script.body).await,
            Channel::WhatsApp => {
                let to = format!("whatsapp:{destination}");
                let body = whatsapp_body(script);
                self.telephony.send_message(&to, &body).await
            }
        };

        let email_count = script.senders_analyzed as i64;
        match attempt {
            Ok(provider_ref) => {
                let record = NotificationRecord::accepted(
                    user_id,
                    destination,
                    channel,
                    provider_ref.sid,
                    NotificationStatus::from_provider(&provider_ref.status),
                    email_count,
                );
                self.db
                    .insert_notification(&record)
                    .await
                    .map_err(Error::Database)?;
                info!(
                    user_id,
                    destination,
                    channel = %channel,
                    provider_ref = record.provider_ref.as_deref().unwrap_or(""),
                    status = %record.status,
                    "Dispatch accepted"
                );
                Ok(record)
            }
            Err(provider_err) => {
                let record =
                    NotificationRecord::failed(user_id, destination, channel, email_count);
                self.db
                    .insert_notification(&record)
                    .await
                    .map_err(Error::Database)?;
                warn!(
                    user_id,
                    destination,
                    channel = %channel,
                    record_id = %record.id,
                    error = %provider_err,
                    "Dispatch failed at provider"
                );
                Err(Error::Provider(provider_err))
            }
        }
    }

    async fn place_call(
        &self,
        destination: &str,
        script: &DigestScript,
        voice_override: Option<&str>,
    ) -> std::result::Result<ProviderRef, ProviderError> {
        let voice = self.select_voice(voice_override).await;
        let twiml = speakable_markup(&script.body, &voice);
        self.telephony.create_call(destination, &twiml).await
    }

    /// Pick the synthesis voice for a call.
    ///
    /// An override is honored only when the provider actually lists it;
    /// any provider failure or an empty voice list degrades to the
    /// configured default rather than blocking the dispatch.
    async fn select_voice(&self, requested: Option<&str>) -> String {
        match self.speech.list_voices().await {
            Ok(voices) if !voices.is_empty() => {
                if let Some(id) = requested {
                    if voices.iter().any(|v| v.id == id) {
                        return id.to_string();
                    }
                    warn!(requested = id, "Requested voice not available, using default");
                }
                self.default_voice_id.clone()
            }
            Ok(_) => {
                warn!("Voice list is empty, using default voice");
                self.default_voice_id.clone()
            }
            Err(e) => {
                warn!(error = %e, "Voice listing failed, using default voice");
                self.default_voice_id.clone()
            }
        }
    }
}

/// Wrap the script body in speakable markup for the telephony provider.
fn speakable_markup(body: &str, voice: &str) -> String {
    format!(
        "<Response><Say voice=\"{}\">{}</Say></Response>",
        xml_escape(voice),
        xml_escape(body)
    )
}

/// Template the script for WhatsApp: emoji markers, bounded length.
fn whatsapp_body(script: &DigestScript) -> String {
    let mut body = format!("📬 *Inbox digest*\n\n{}", script.body);
    if script.meetings_found > 0 {
        body.push_str(&format!("\n\n📅 {} meeting-related", script.meetings_found));
    }
    if body.chars().count() > WHATSAPP_MAX_BODY {
        let truncated: String = body.chars().take(WHATSAPP_MAX_BODY - 1).collect();
        body = format!("{truncated}…");
    }
    body
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use crate::config::VerifyConfig;
    use crate::digest::generator::compose_script;
    use crate::error::ProviderError;
    use crate::providers::{ProviderRef, Voice};
    use crate::store::LibSqlBackend;
    use crate::triage::{Category, Sender};

    const PHONE: &str = "+15551234567";

    /// Stub telephony transport: records requests, optionally fails.
    struct StubTelephony {
        calls: StdMutex<Vec<(String, String)>>,
        messages: StdMutex<Vec<(String, String)>>,
        fail: StdMutex<bool>,
    }

    impl StubTelephony {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                messages: StdMutex::new(Vec::new()),
                fail: StdMutex::new(false),
            })
        }
    }

    #[async_trait]
    impl TelephonyProvider for StubTelephony {
        fn name(&self) -> &str {
            "stub"
        }

        async fn create_call(&self, to: &str, twiml: &str) -> std::result::Result<ProviderRef, ProviderError> {
            if *self.fail.lock().unwrap() {
                return Err(ProviderError::Unavailable {
                    provider: "stub".into(),
                    reason: "timeout".into(),
                    retry_after: None,
                });
            }
            self.calls
                .lock()
                .unwrap()
                .push((to.to_string(), twiml.to_string()));
            Ok(ProviderRef {
                sid: "CA-stub".into(),
                status: "queued".into(),
            })
        }

        async fn send_message(&self, to: &str, body: &str) -> std::result::Result<ProviderRef, ProviderError> {
            if *self.fail.lock().unwrap() {
                return Err(ProviderError::Unavailable {
                    provider: "stub".into(),
                    reason: "timeout".into(),
                    retry_after: None,
                });
            }
            self.messages
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(ProviderRef {
                sid: "SM-stub".into(),
                status: "queued".into(),
            })
        }
    }

    /// Stub speech provider with a controllable voice list.
    struct StubSpeech {
        voices: Vec<Voice>,
        fail: bool,
    }

    #[async_trait]
    impl SpeechProvider for StubSpeech {
        fn name(&self) -> &str {
            "stub-speech"
        }

        async fn list_voices(&self) -> std::result::Result<Vec<Voice>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unavailable {
                    provider: "stub-speech".into(),
                    reason: "connection refused".into(),
                    retry_after: None,
                });
            }
            Ok(self.voices.clone())
        }
    }

    struct Harness {
        dispatcher: ChannelDispatcher,
        db: Arc<dyn Database>,
        telephony: Arc<StubTelephony>,
        verifier: Arc<VerificationSessionManager>,
    }

    async fn harness(speech_fail: bool) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let telephony = StubTelephony::new();
        let speech = Arc::new(StubSpeech {
            voices: vec![Voice {
                id: "voice-a".into(),
                name: "Ada".into(),
            }],
            fail: speech_fail,
        });
        let verifier = Arc::new(VerificationSessionManager::new(
            telephony.clone(),
            VerifyConfig::default(),
        ));
        let dispatcher = ChannelDispatcher::new(
            Arc::clone(&db),
            telephony.clone(),
            speech,
            Arc::clone(&verifier),
            "default-voice".into(),
        );
        Harness {
            dispatcher,
            db,
            telephony,
            verifier,
        }
    }

    async fn verify_phone(h: &Harness, user_id: &str) {
        h.verifier.send_code(user_id, PHONE).await.unwrap();
        let code: String = {
            let sent = h.telephony.messages.lock().unwrap();
            let (_, body) = sent.last().unwrap();
            body.chars().filter(|c| c.is_ascii_digit()).take(6).collect()
        };
        h.verifier.verify_code(user_id, PHONE, &code).await.unwrap();
    }

    fn sample_script() -> DigestScript {
        let sender = Sender {
            id: uuid::Uuid::new_v4(),
            user_id: "u1".into(),
            email: "acme@acme.com".into(),
            domain: "acme.com".into(),
            display_name: Some("Acme".into()),
            category: Category::CallMe,
            last_message_at: chrono::Utc::now(),
            message_count: 2,
            last_subject: Some("Weekly Update".into()),
            last_preview: None,
        };
        compose_script(&[sender], 5)
    }

    #[tokio::test]
    async fn unverified_voice_dispatch_writes_no_record() {
        let h = harness(false).await;
        let err = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::Voice, &sample_script(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::NotVerified { .. })
        ));
        assert!(h.db.list_notifications("u1", 10).await.unwrap().is_empty());
        assert!(h.telephony.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_destination_writes_no_record() {
        let h = harness(false).await;
        let err = h
            .dispatcher
            .dispatch("u1", "555-GHOST", Channel::Sms, &sample_script(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::MalformedDestination { .. })
        ));
        assert!(h.db.list_notifications("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn voice_dispatch_places_call_with_speakable_markup() {
        let h = harness(false).await;
        verify_phone(&h, "u1").await;

        let record = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::Voice, &sample_script(), None)
            .await
            .unwrap();
        assert_eq!(record.channel, Channel::Voice);
        assert_eq!(record.status, NotificationStatus::Queued);
        assert_eq!(record.provider_ref.as_deref(), Some("CA-stub"));

        let calls = h.telephony.calls.lock().unwrap();
        let (to, twiml) = &calls[0];
        assert_eq!(to, PHONE);
        assert!(twiml.contains("<Say"));
        assert!(twiml.contains("Weekly Update"));
    }

    #[tokio::test]
    async fn voice_override_honored_when_listed() {
        let h = harness(false).await;
        verify_phone(&h, "u1").await;

        h.dispatcher
            .dispatch("u1", PHONE, Channel::Voice, &sample_script(), Some("voice-a"))
            .await
            .unwrap();
        let calls = h.telephony.calls.lock().unwrap();
        assert!(calls[0].1.contains("voice=\"voice-a\""));
    }

    #[tokio::test]
    async fn speech_failure_degrades_to_default_voice() {
        let h = harness(true).await;
        verify_phone(&h, "u1").await;

        let record = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::Voice, &sample_script(), Some("voice-a"))
            .await
            .unwrap();
        assert_eq!(record.status, NotificationStatus::Queued);
        let calls = h.telephony.calls.lock().unwrap();
        assert!(calls[0].1.contains("voice=\"default-voice\""));
    }

    #[tokio::test]
    async fn sms_dispatch_sends_script_body() {
        let h = harness(false).await;
        verify_phone(&h, "u1").await;

        let record = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::Sms, &sample_script(), None)
            .await
            .unwrap();
        assert_eq!(record.channel, Channel::Sms);

        let messages = h.telephony.messages.lock().unwrap();
        let (to, body) = messages.last().unwrap();
        assert_eq!(to, PHONE);
        assert!(body.contains("Weekly Update"));
    }

    #[tokio::test]
    async fn whatsapp_piggybacks_on_verified_number() {
        let h = harness(false).await;
        verify_phone(&h, "u1").await;

        let record = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::WhatsApp, &sample_script(), None)
            .await
            .unwrap();
        assert_eq!(record.channel, Channel::WhatsApp);
        // The stored destination stays bare E.164; the prefix is transport-only.
        assert_eq!(record.destination, PHONE);

        let messages = h.telephony.messages.lock().unwrap();
        let (to, body) = messages.last().unwrap();
        assert_eq!(to, &format!("whatsapp:{PHONE}"));
        assert!(body.starts_with("📬"));
    }

    #[tokio::test]
    async fn provider_failure_writes_exactly_one_failed_record() {
        let h = harness(false).await;
        verify_phone(&h, "u1").await;
        *h.telephony.fail.lock().unwrap() = true;

        let err = h
            .dispatcher
            .dispatch("u1", PHONE, Channel::Voice, &sample_script(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        let records = h.db.list_notifications("u1", 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NotificationStatus::Failed);
        assert!(records[0].provider_ref.is_none());
    }

    #[test]
    fn speakable_markup_escapes_xml() {
        let markup = speakable_markup("Tom & Jerry <updates>", "ada");
        assert!(markup.contains("Tom &amp; Jerry &lt;updates&gt;"));
        assert!(!markup.contains("<updates>"));
    }

    #[test]
    fn whatsapp_body_is_bounded() {
        let mut script = sample_script_static();
        script.body = "x".repeat(5000);
        let body = whatsapp_body(&script);
        assert!(body.chars().count() <= WHATSAPP_MAX_BODY);
        assert!(body.ends_with('…'));
    }

    fn sample_script_static() -> DigestScript {
        DigestScript {
            body: "test".into(),
            entries: vec![],
            senders_analyzed: 0,
            important_found: 0,
            meetings_found: 0,
        }
    }
}
