//! Verification session manager — serialized per-key code challenges.
//!
//! Holds every in-flight session behind one async lock, which gives the
//! single-writer discipline the state machine needs: two concurrent
//! checks against the same session can never both win the transition
//! into `Verified`. Sessions live in memory only; a restart forces
//! re-verification, which fails safe.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::VerifyConfig;
use crate::error::{Error, Result, VerifyError};
use crate::phone::require_e164;
use crate::providers::TelephonyProvider;
use crate::verify::session::{VerificationSession, VerifyState};

type SessionKey = (String, String);

/// Issues and checks one-time codes, one session per (user, phone).
pub struct VerificationSessionManager {
    sessions: Mutex<HashMap<SessionKey, VerificationSession>>,
    sms: Arc<dyn TelephonyProvider>,
    config: VerifyConfig,
}

impl VerificationSessionManager {
    pub fn new(sms: Arc<dyn TelephonyProvider>, config: VerifyConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sms,
            config,
        }
    }

    /// Issue a code for (user, phone) and deliver it by SMS.
    ///
    /// Allowed from any prior state — a new send supersedes the old
    /// session and invalidates its code. The session is only stored
    /// after the provider accepts the message, so a provider failure
    /// leaves no half-state behind.
    pub async fn send_code(&self, user_id: &str, phone: &str) -> Result<()> {
        require_e164(phone).map_err(Error::Dispatch)?;

        let code = generate_code(self.config.code_length);
        let ttl_min = (self.config.code_ttl.as_secs() / 60).max(1);
        let body = format!(
            "Your Inbox Courier code is {code}. It expires in {ttl_min} minutes."
        );

        self.sms
            .send_message(phone, &body)
            .await
            .map_err(Error::Provider)?;

        let session = VerificationSession::new(
            code,
            Utc::now(),
            chrono::Duration::from_std(self.config.code_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        );

        let mut sessions = self.sessions.lock().await;
        let superseded = sessions
            .insert((user_id.to_string(), phone.to_string()), session)
            .is_some();
        info!(user_id, phone, superseded, "Verification code sent");
        Ok(())
    }

    /// Check a candidate code for (user, phone).
    ///
    /// Serialized with every other operation on the same key; exactly
    /// one concurrent correct check wins, competitors observe
    /// `AlreadyVerified`.
    pub async fn verify_code(&self, user_id: &str, phone: &str, candidate: &str) -> Result<()> {
        require_e164(phone).map_err(Error::Dispatch)?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&(user_id.to_string(), phone.to_string()))
            .ok_or(Error::Verify(VerifyError::NoSession))?;

        match session.check(candidate, self.config.max_attempts, Utc::now()) {
            Ok(()) => {
                info!(user_id, phone, "Phone number verified");
                Ok(())
            }
            Err(e) => {
                debug!(user_id, phone, state = %session.state, error = %e, "Code check failed");
                Err(Error::Verify(e))
            }
        }
    }

    /// Whether (user, phone) holds a verified session.
    pub async fn is_verified(&self, user_id: &str, phone: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(user_id.to_string(), phone.to_string()))
            .map(|s| s.state == VerifyState::Verified)
            .unwrap_or(false)
    }

    /// Current state for (user, phone); `None` when no session exists.
    pub async fn session_state(&self, user_id: &str, phone: &str) -> VerifyState {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(user_id.to_string(), phone.to_string()))
            .map(|s| s.state)
            .unwrap_or(VerifyState::None)
    }

    /// TTL housekeeping: flip past-expiry `CodeSent` sessions to
    /// `Expired` and drop failed terminal sessions. Verified sessions
    /// are kept — they gate dispatch. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        for s in sessions.values_mut() {
            if s.state == VerifyState::CodeSent && now > s.expires_at {
                s.state = VerifyState::Expired;
            }
        }
        let before = sessions.len();
        sessions.retain(|_, s| !matches!(s.state, VerifyState::Expired | VerifyState::Locked));
        before - sessions.len()
    }
}

/// Fixed-length numeric code.
fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use crate::error::ProviderError;
    use crate::providers::ProviderRef;

    /// Stub SMS transport that records bodies and can be told to fail.
    struct StubSms {
        sent: StdMutex<Vec<(String, String)>>,
        fail: StdMutex<bool>,
    }

    impl StubSms {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail: StdMutex::new(false),
            })
        }

        fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        /// The code in the most recent SMS body.
        fn last_code(&self) -> String {
            let sent = self.sent.lock().unwrap();
            let (_, body) = sent.last().expect("no SMS sent");
            body.chars().filter(|c| c.is_ascii_digit()).take(6).collect()
        }
    }

    #[async_trait]
    impl TelephonyProvider for StubSms {
        fn name(&self) -> &str {
            "stub"
        }

        async fn create_call(&self, _to: &str, _twiml: &str) -> std::result::Result<ProviderRef, ProviderError> {
            unimplemented!("not used in verification tests")
        }

        async fn send_message(&self, to: &str, body: &str) -> std::result::Result<ProviderRef, ProviderError> {
            if *self.fail.lock().unwrap() {
                return Err(ProviderError::Unavailable {
                    provider: "stub".into(),
                    reason: "connection refused".into(),
                    retry_after: None,
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(ProviderRef {
                sid: "SM-stub".into(),
                status: "queued".into(),
            })
        }
    }

    const PHONE: &str = "+15551234567";

    fn manager(sms: Arc<StubSms>) -> VerificationSessionManager {
        VerificationSessionManager::new(sms, VerifyConfig::default())
    }

    #[tokio::test]
    async fn send_then_verify_happy_path() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();
        mgr.verify_code("u1", PHONE, &code).await.unwrap();
        assert!(mgr.is_verified("u1", PHONE).await);
    }

    #[tokio::test]
    async fn provider_failure_creates_no_session() {
        let sms = StubSms::new();
        sms.set_fail(true);
        let mgr = manager(sms.clone());

        let err = mgr.send_code("u1", PHONE).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(mgr.session_state("u1", PHONE).await, VerifyState::None);
    }

    #[tokio::test]
    async fn malformed_phone_is_rejected_before_any_send() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        let err = mgr.send_code("u1", "555-1234").await.unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
        assert!(sms.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn three_wrong_codes_lock_even_for_the_right_code() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();

        for _ in 0..2 {
            let err = mgr.verify_code("u1", PHONE, "000000").await.unwrap_err();
            assert!(matches!(
                err,
                Error::Verify(VerifyError::CodeMismatch { .. })
            ));
        }
        let err = mgr.verify_code("u1", PHONE, "000000").await.unwrap_err();
        assert!(matches!(err, Error::Verify(VerifyError::TooManyAttempts)));
        assert_eq!(mgr.session_state("u1", PHONE).await, VerifyState::Locked);

        // 4th attempt with the correct code still fails
        let err = mgr.verify_code("u1", PHONE, &code).await.unwrap_err();
        assert!(matches!(err, Error::Verify(VerifyError::TooManyAttempts)));
        assert!(!mgr.is_verified("u1", PHONE).await);
    }

    #[tokio::test]
    async fn locked_session_can_restart() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        for _ in 0..3 {
            let _ = mgr.verify_code("u1", PHONE, "000000").await;
        }
        assert_eq!(mgr.session_state("u1", PHONE).await, VerifyState::Locked);

        // Restart supersedes the locked session
        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();
        mgr.verify_code("u1", PHONE, &code).await.unwrap();
        assert!(mgr.is_verified("u1", PHONE).await);
    }

    #[tokio::test]
    async fn resend_invalidates_the_old_code() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        let old_code = sms.last_code();
        mgr.send_code("u1", PHONE).await.unwrap();
        let new_code = sms.last_code();

        if old_code != new_code {
            let err = mgr.verify_code("u1", PHONE, &old_code).await.unwrap_err();
            assert!(matches!(
                err,
                Error::Verify(VerifyError::CodeMismatch { .. })
            ));
        }
        mgr.verify_code("u1", PHONE, &new_code).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_correct_checks_yield_one_winner() {
        let sms = StubSms::new();
        let mgr = Arc::new(manager(sms.clone()));

        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();

        let a = {
            let mgr = Arc::clone(&mgr);
            let code = code.clone();
            tokio::spawn(async move { mgr.verify_code("u1", PHONE, &code).await })
        };
        let b = {
            let mgr = Arc::clone(&mgr);
            let code = code.clone();
            tokio::spawn(async move { mgr.verify_code("u1", PHONE, &code).await })
        };

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        let wins = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one concurrent check may win");
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(
            loser.unwrap_err(),
            Error::Verify(VerifyError::AlreadyVerified)
        ));
        assert!(mgr.is_verified("u1", PHONE).await);
    }

    #[tokio::test]
    async fn sessions_are_scoped_per_user_and_phone() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();
        mgr.verify_code("u1", PHONE, &code).await.unwrap();

        assert!(mgr.is_verified("u1", PHONE).await);
        assert!(!mgr.is_verified("u2", PHONE).await);
        assert!(!mgr.is_verified("u1", "+15559876543").await);
    }

    #[tokio::test]
    async fn sweep_drops_failed_sessions_keeps_verified() {
        let sms = StubSms::new();
        let mgr = manager(sms.clone());

        mgr.send_code("u1", PHONE).await.unwrap();
        let code = sms.last_code();
        mgr.verify_code("u1", PHONE, &code).await.unwrap();

        mgr.send_code("u2", PHONE).await.unwrap();
        for _ in 0..3 {
            let _ = mgr.verify_code("u2", PHONE, "000000").await;
        }

        let dropped = mgr.sweep().await;
        assert_eq!(dropped, 1);
        assert!(mgr.is_verified("u1", PHONE).await);
        assert_eq!(mgr.session_state("u2", PHONE).await, VerifyState::None);
    }

    #[test]
    fn generated_codes_are_fixed_length_numeric() {
        for _ in 0..50 {
            let code = generate_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
