//! Phone number verification — one-time-code challenge per (user, phone).

pub mod manager;
pub mod session;

pub use manager::VerificationSessionManager;
pub use session::{VerificationSession, VerifyState};
