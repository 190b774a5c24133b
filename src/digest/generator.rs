//! Digest script generation.
//!
//! Turns the current call-me bucket into a single deliverable script.
//! The script is tiered by how many senders made the cut so the spoken
//! length stays roughly constant, and it is regenerated fresh on every
//! request — the underlying sender set can change between calls.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DigestConfig;
use crate::error::Result;
use crate::store::Database;
use crate::triage::{Category, CategoryRuleEngine, Sender};

/// Subjects matching this count as meeting-related.
static MEETING_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(meeting|call|zoom|conference|appointment)\b").unwrap()
});

/// One sender named in a digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    /// Spoken name (display name or address).
    pub name: String,
    /// Latest subject line, verbatim.
    pub subject: Option<String>,
}

/// A generated digest — value object, never persisted or cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestScript {
    /// The spoken/written script body.
    pub body: String,
    /// The selected senders, most recent first.
    pub entries: Vec<DigestEntry>,
    /// Size of the full call-me bucket.
    pub senders_analyzed: usize,
    /// Size of the selected subset (≤ max_senders).
    pub important_found: usize,
    /// Meeting-keyword hits among selected subjects.
    pub meetings_found: usize,
}

/// Generates digest scripts from the user's current sender set.
pub struct DigestGenerator {
    db: Arc<dyn Database>,
    config: DigestConfig,
}

impl DigestGenerator {
    pub fn new(db: Arc<dyn Database>, config: DigestConfig) -> Self {
        Self { db, config }
    }

    /// Generate a fresh digest for one user.
    ///
    /// An empty call-me bucket is not a failure — callers must always
    /// receive a deliverable script, so the empty case produces an
    /// apologetic one.
    pub async fn generate(&self, user_id: &str) -> Result<DigestScript> {
        let rules = self.db.list_rules(user_id).await?;
        let senders = self.db.list_senders(user_id).await?;

        let mut bucket: Vec<Sender> = senders
            .into_iter()
            .filter(|s| {
                s.message_count > 0
                    && CategoryRuleEngine::resolve_category(s, &rules) == Category::CallMe
            })
            .collect();
        bucket.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));

        let script = compose_script(&bucket, self.config.max_senders);
        debug!(
            user_id,
            analyzed = script.senders_analyzed,
            selected = script.important_found,
            meetings = script.meetings_found,
            "Digest generated"
        );
        Ok(script)
    }
}

/// Build the tiered script from a sorted (most recent first) call-me bucket.
///
/// Counter invariants hold by construction:
/// meetings_found ≤ important_found ≤ senders_analyzed.
pub fn compose_script(bucket: &[Sender], max_senders: usize) -> DigestScript {
    let senders_analyzed = bucket.len();
    let selected = &bucket[..bucket.len().min(max_senders)];

    let entries: Vec<DigestEntry> = selected
        .iter()
        .map(|s| DigestEntry {
            name: s.spoken_name().to_string(),
            subject: s.last_subject.clone(),
        })
        .collect();

    let meetings_found = selected
        .iter()
        .filter(|s| {
            s.last_subject
                .as_deref()
                .is_some_and(|subj| MEETING_KEYWORDS.is_match(subj))
        })
        .count();

    let mut body = match selected {
        [] => {
            "I checked your inbox, but no senders are marked call-me yet. \
             Nothing needs your attention right now."
                .to_string()
        }
        [only] => {
            // One sender: name them and quote the subject verbatim.
            match only.last_subject.as_deref() {
                Some(subject) => format!(
                    "The priority is {} with \"{}\".",
                    only.spoken_name(),
                    subject
                ),
                None => format!("The priority is {}.", only.spoken_name()),
            }
        }
        few if few.len() <= 3 => {
            let names: Vec<&str> = few.iter().map(|s| s.spoken_name()).collect();
            format!(
                "You have {} important contacts waiting: {}.",
                few.len(),
                join_spoken(&names)
            )
        }
        many => {
            // Name the top two; the remainder counts the whole bucket,
            // not just the selected slice.
            let rest = senders_analyzed - 2;
            format!(
                "Top of your inbox: {} and {}, +{} other important contacts.",
                many[0].spoken_name(),
                many[1].spoken_name(),
                rest
            )
        }
    };

    if meetings_found > 0 {
        let noun = if meetings_found == 1 {
            "subject looks"
        } else {
            "subjects look"
        };
        body.push_str(&format!(" {meetings_found} {noun} meeting-related."));
    }

    DigestScript {
        body,
        important_found: entries.len(),
        entries,
        senders_analyzed,
        meetings_found,
    }
}

/// Join names the way they'd be read aloud: "A", "A and B", "A, B, and C".
fn join_spoken(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn make_sender(name: &str, subject: Option<&str>, minutes_ago: i64) -> Sender {
        Sender {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            email: format!("{}@example.com", name.to_lowercase()),
            domain: "example.com".into(),
            display_name: Some(name.into()),
            category: Category::CallMe,
            last_message_at: Utc::now() - Duration::minutes(minutes_ago),
            message_count: 1,
            last_subject: subject.map(String::from),
            last_preview: None,
        }
    }

    #[test]
    fn empty_bucket_still_produces_a_script() {
        let script = compose_script(&[], 5);
        assert!(!script.body.is_empty());
        assert_eq!(script.senders_analyzed, 0);
        assert_eq!(script.important_found, 0);
        assert_eq!(script.meetings_found, 0);
    }

    #[test]
    fn single_sender_quotes_subject_verbatim() {
        let bucket = vec![make_sender("Acme", Some("Weekly Update"), 5)];
        let script = compose_script(&bucket, 5);
        assert!(script.body.contains("Acme"));
        assert!(script.body.contains("Weekly Update"));
        assert!(script.body.contains("priority"));
        assert_eq!(script.important_found, 1);
    }

    #[test]
    fn two_or_three_senders_list_all_names() {
        let bucket = vec![
            make_sender("Alice", Some("Contract"), 1),
            make_sender("Bob", Some("Budget"), 2),
            make_sender("Carol", None, 3),
        ];
        let script = compose_script(&bucket, 5);
        assert!(script.body.contains("3 important contacts"));
        assert!(script.body.contains("Alice"));
        assert!(script.body.contains("Bob"));
        assert!(script.body.contains("Carol"));
    }

    #[test]
    fn four_senders_name_top_two_plus_remainder() {
        let bucket = vec![
            make_sender("Alice", None, 1),
            make_sender("Bob", None, 2),
            make_sender("Carol", None, 3),
            make_sender("Dave", None, 4),
        ];
        let script = compose_script(&bucket, 5);
        assert!(script.body.contains("Alice"));
        assert!(script.body.contains("Bob"));
        assert!(!script.body.contains("Carol"));
        assert!(!script.body.contains("Dave"));
        assert!(script.body.contains("+2 other important contacts"));
    }

    #[test]
    fn selection_is_bounded_to_five() {
        let bucket: Vec<Sender> = (0..8)
            .map(|i| make_sender(&format!("Sender{i}"), None, i))
            .collect();
        let script = compose_script(&bucket, 5);
        assert_eq!(script.important_found, 5);
        assert_eq!(script.senders_analyzed, 8);
        // Remainder counts the whole bucket beyond the two named.
        assert!(script.body.contains("+6 other important contacts"));
    }

    #[test]
    fn most_recent_senders_are_selected_first() {
        let bucket = vec![
            make_sender("Newest", Some("Hi"), 1),
            make_sender("Older", Some("Hello"), 60),
        ];
        let script = compose_script(&bucket, 5);
        assert_eq!(script.entries[0].name, "Newest");
        assert_eq!(script.entries[1].name, "Older");
    }

    #[test]
    fn meeting_keywords_are_counted_case_insensitively() {
        let bucket = vec![
            make_sender("Alice", Some("Zoom invite for Friday"), 1),
            make_sender("Bob", Some("MEETING agenda"), 2),
            make_sender("Carol", Some("Lunch?"), 3),
        ];
        let script = compose_script(&bucket, 5);
        assert_eq!(script.meetings_found, 2);
    }

    #[test]
    fn meeting_keywords_require_word_boundaries() {
        // "recall" must not match the "call" keyword.
        let bucket = vec![make_sender("Alice", Some("Product recall notice"), 1)];
        let script = compose_script(&bucket, 5);
        assert_eq!(script.meetings_found, 0);
    }

    #[test]
    fn counters_are_internally_consistent() {
        for n in 0..10 {
            let bucket: Vec<Sender> = (0..n)
                .map(|i| make_sender(&format!("S{i}"), Some("meeting"), i))
                .collect();
            let script = compose_script(&bucket, 5);
            assert!(script.meetings_found <= script.important_found);
            assert!(script.important_found <= script.senders_analyzed);
            assert!(script.important_found <= 5);
        }
    }

    #[test]
    fn join_spoken_forms() {
        assert_eq!(join_spoken(&["A"]), "A");
        assert_eq!(join_spoken(&["A", "B"]), "A and B");
        assert_eq!(join_spoken(&["A", "B", "C"]), "A, B, and C");
    }
}
