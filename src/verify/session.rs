//! Verification session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// States of a phone verification.
///
/// `None` means no session exists for the (user, phone) pair. A code
/// send moves to `CodeSent`; from there the session either verifies or
/// ends in one of the terminal failure branches. A new code send is
/// always allowed and supersedes whatever came before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyState {
    None,
    CodeSent,
    Verified,
    Expired,
    Locked,
}

impl VerifyState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: VerifyState) -> bool {
        use VerifyState::*;
        match target {
            // A fresh send supersedes any prior session.
            CodeSent => true,
            Verified | Expired | Locked => *self == CodeSent,
            None => false,
        }
    }

    /// Whether this state accepts no further code checks.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Expired | Self::Locked)
    }
}

impl Default for VerifyState {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for VerifyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::CodeSent => "code_sent",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Locked => "locked",
        };
        write!(f, "{s}")
    }
}

/// One in-flight verification for a (user, phone) pair.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    /// The one-time code, fixed-length numeric.
    pub code: String,
    /// When the code was issued.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry — not sliding.
    pub expires_at: DateTime<Utc>,
    /// Wrong attempts so far.
    pub attempts: u32,
    /// Set on the first successful check; the session is then terminal.
    pub consumed: bool,
    /// Current state.
    pub state: VerifyState,
}

impl VerificationSession {
    /// Create a session in `CodeSent` with an absolute expiry.
    pub fn new(code: String, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            code,
            created_at: now,
            expires_at: now + ttl,
            attempts: 0,
            consumed: false,
            state: VerifyState::CodeSent,
        }
    }

    /// Check a candidate code against this session at time `now`.
    ///
    /// Applies the full transition table: expiry beats everything, then
    /// the attempt cap, then the code comparison. Each failure path
    /// either leaves the session unchanged (mismatch under the cap) or
    /// lands in a clearly terminal state.
    pub fn check(
        &mut self,
        candidate: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), VerifyError> {
        match self.state {
            VerifyState::Verified => return Err(VerifyError::AlreadyVerified),
            VerifyState::Expired => return Err(VerifyError::CodeExpired),
            VerifyState::Locked => return Err(VerifyError::TooManyAttempts),
            VerifyState::CodeSent => {}
            VerifyState::None => return Err(VerifyError::NoSession),
        }

        if now > self.expires_at {
            self.state = VerifyState::Expired;
            return Err(VerifyError::CodeExpired);
        }

        if !constant_time_eq(candidate, &self.code) {
            self.attempts += 1;
            if self.attempts >= max_attempts {
                self.state = VerifyState::Locked;
                return Err(VerifyError::TooManyAttempts);
            }
            return Err(VerifyError::CodeMismatch {
                remaining: max_attempts - self.attempts,
            });
        }

        self.consumed = true;
        self.state = VerifyState::Verified;
        Ok(())
    }
}

/// Compare two codes without an early-exit on the first differing byte.
///
/// Length still leaks, but codes are fixed-length so that reveals
/// nothing useful.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(code: &str) -> VerificationSession {
        VerificationSession::new(code.into(), Utc::now(), Duration::minutes(5))
    }

    #[test]
    fn valid_transitions() {
        use VerifyState::*;
        assert!(None.can_transition_to(CodeSent));
        assert!(CodeSent.can_transition_to(Verified));
        assert!(CodeSent.can_transition_to(Expired));
        assert!(CodeSent.can_transition_to(Locked));
        // Restarts supersede from every state
        assert!(Expired.can_transition_to(CodeSent));
        assert!(Locked.can_transition_to(CodeSent));
        assert!(CodeSent.can_transition_to(CodeSent));
        assert!(Verified.can_transition_to(CodeSent));
    }

    #[test]
    fn invalid_transitions() {
        use VerifyState::*;
        assert!(!None.can_transition_to(Verified));
        assert!(!Expired.can_transition_to(Verified));
        assert!(!Locked.can_transition_to(Verified));
        assert!(!Verified.can_transition_to(None));
    }

    #[test]
    fn terminal_states() {
        assert!(VerifyState::Verified.is_terminal());
        assert!(VerifyState::Expired.is_terminal());
        assert!(VerifyState::Locked.is_terminal());
        assert!(!VerifyState::CodeSent.is_terminal());
        assert!(!VerifyState::None.is_terminal());
    }

    #[test]
    fn correct_code_verifies_and_consumes() {
        let mut s = session("123456");
        assert!(s.check("123456", 3, Utc::now()).is_ok());
        assert!(s.consumed);
        assert_eq!(s.state, VerifyState::Verified);
    }

    #[test]
    fn code_is_single_use() {
        let mut s = session("123456");
        s.check("123456", 3, Utc::now()).unwrap();
        assert_eq!(
            s.check("123456", 3, Utc::now()),
            Err(VerifyError::AlreadyVerified)
        );
    }

    #[test]
    fn three_wrong_attempts_lock_the_session() {
        let mut s = session("123456");
        assert_eq!(
            s.check("000000", 3, Utc::now()),
            Err(VerifyError::CodeMismatch { remaining: 2 })
        );
        assert_eq!(
            s.check("000000", 3, Utc::now()),
            Err(VerifyError::CodeMismatch { remaining: 1 })
        );
        assert_eq!(
            s.check("000000", 3, Utc::now()),
            Err(VerifyError::TooManyAttempts)
        );
        assert_eq!(s.state, VerifyState::Locked);
        // Even the correct code fails after lockout
        assert_eq!(
            s.check("123456", 3, Utc::now()),
            Err(VerifyError::TooManyAttempts)
        );
        assert!(!s.consumed);
    }

    #[test]
    fn expiry_is_absolute() {
        let mut s = session("123456");
        let late = Utc::now() + Duration::minutes(6);
        assert_eq!(s.check("123456", 3, late), Err(VerifyError::CodeExpired));
        assert_eq!(s.state, VerifyState::Expired);
        assert!(!s.consumed);
        // And stays expired even if the clock goes back
        assert_eq!(
            s.check("123456", 3, Utc::now()),
            Err(VerifyError::CodeExpired)
        );
    }

    #[test]
    fn mismatch_under_cap_stays_code_sent() {
        let mut s = session("123456");
        let _ = s.check("999999", 3, Utc::now());
        assert_eq!(s.state, VerifyState::CodeSent);
        // Correct code still works afterwards
        assert!(s.check("123456", 3, Utc::now()).is_ok());
    }
}
