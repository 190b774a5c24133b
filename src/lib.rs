//! Inbox Courier — digest & delivery core.
//!
//! Classifies inbox senders into priority buckets, turns the call-me
//! bucket into a bounded spoken script, and delivers it over a voice
//! call, SMS, or WhatsApp message after a one-time-code phone
//! verification.

pub mod api;
pub mod config;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod phone;
pub mod providers;
pub mod store;
pub mod triage;
pub mod verify;
