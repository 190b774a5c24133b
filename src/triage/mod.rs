//! Sender triage — priority buckets and user-authored domain rules.

pub mod model;
pub mod rules;

pub use model::{Category, CategoryRule, Sender};
pub use rules::CategoryRuleEngine;
