//! Sender and category rule data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority bucket a sender is assigned to.
///
/// Closed enumeration — a sender always carries exactly one of these.
/// `Unassigned` is never surfaced in a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Important enough to interrupt the user with a call.
    CallMe,
    /// Worth a mention in a later digest.
    RemindMe,
    /// Known sender the user doesn't want to hear about.
    KeepQuiet,
    /// Newsletter/bulk mail.
    Newsletter,
    /// Subscription the user regrets.
    WhyDidISignup,
    /// Sensitive — never spoken aloud or forwarded.
    DontTellAnyone,
    /// No category assigned yet.
    Unassigned,
}

impl Default for Category {
    fn default() -> Self {
        Self::Unassigned
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CallMe => "call_me",
            Self::RemindMe => "remind_me",
            Self::KeepQuiet => "keep_quiet",
            Self::Newsletter => "newsletter",
            Self::WhyDidISignup => "why_did_i_signup",
            Self::DontTellAnyone => "dont_tell_anyone",
            Self::Unassigned => "unassigned",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call_me" => Ok(Self::CallMe),
            "remind_me" => Ok(Self::RemindMe),
            "keep_quiet" => Ok(Self::KeepQuiet),
            "newsletter" => Ok(Self::Newsletter),
            "why_did_i_signup" => Ok(Self::WhyDidISignup),
            "dont_tell_anyone" => Ok(Self::DontTellAnyone),
            "unassigned" => Ok(Self::Unassigned),
            _ => Err(format!("Unknown category: {s}")),
        }
    }
}

/// One email-sending identity observed for a user.
///
/// Created on the first observed message from a sender, updated on
/// every subsequent one, never hard-deleted (the category may be reset
/// to `Unassigned` instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    /// Unique sender ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Full email address.
    pub email: String,
    /// Domain part of the address, lowercased.
    pub domain: String,
    /// Human-readable display name, if the mail carried one.
    pub display_name: Option<String>,
    /// Stored bucket (AI-assigned or user-set). Rules may override at read time.
    pub category: Category,
    /// When the latest message arrived.
    pub last_message_at: DateTime<Utc>,
    /// Total messages observed from this sender.
    pub message_count: i64,
    /// Subject line of the latest message.
    pub last_subject: Option<String>,
    /// Preview text of the latest message.
    pub last_preview: Option<String>,
}

impl Sender {
    /// Best available spoken name — display name, falling back to the address.
    pub fn spoken_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// A user-authored category override for a whole domain.
///
/// At most one active rule per (user, domain); when present it always
/// beats the sender's stored category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Unique rule ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Domain the rule applies to, lowercased.
    pub domain: String,
    /// Bucket every sender on this domain resolves to.
    pub category: Category,
    /// Free-text reason the user gave.
    pub reason: String,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

/// Extract and lowercase the domain part of an email address.
pub fn domain_of(email: &str) -> String {
    email
        .rsplit_once('@')
        .map(|(_, d)| d.to_ascii_lowercase())
        .unwrap_or_default()
}
