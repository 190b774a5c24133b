//! Digest generation — the call-me bucket as one bounded spoken script.

pub mod generator;

pub use generator::{DigestGenerator, DigestScript};
