//! Category resolution — user rules over stored categories.
//!
//! Runs before digest selection to apply domain overrides:
//! - a rule for the sender's domain wins outright
//! - otherwise the sender keeps its stored (AI-assigned) category
//! - senders with neither resolve to `Unassigned`
//!
//! Pure and total: no I/O, never fails.

use tracing::debug;

use crate::triage::model::{Category, CategoryRule, Sender};

/// Resolves a sender's effective bucket from the user's rule set.
pub struct CategoryRuleEngine;

impl CategoryRuleEngine {
    /// Resolve the effective category for one sender.
    ///
    /// Write paths keep at most one rule per (user, domain), so there is
    /// normally no ambiguity. If storage ever holds duplicates anyway,
    /// the most recently created rule wins, deterministically.
    pub fn resolve_category(sender: &Sender, rules: &[CategoryRule]) -> Category {
        let matched = rules
            .iter()
            .filter(|r| r.domain.eq_ignore_ascii_case(&sender.domain))
            .max_by_key(|r| r.created_at);

        match matched {
            Some(rule) => {
                debug!(
                    sender = %sender.email,
                    domain = %sender.domain,
                    category = %rule.category,
                    "Domain rule overrides stored category"
                );
                rule.category
            }
            None => sender.category,
        }
    }
}
