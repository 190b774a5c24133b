//! Notification log data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Outbound call with synthesized speech.
    Voice,
    /// Plain SMS.
    Sms,
    /// WhatsApp message.
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Voice => "voice",
            Self::Sms => "sms",
            Self::WhatsApp => "whatsapp",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" => Ok(Self::Voice),
            "sms" => Ok(Self::Sms),
            "whatsapp" => Ok(Self::WhatsApp),
            _ => Err(format!("Unknown channel: {s}")),
        }
    }
}

/// Closed status enumeration for a notification record.
///
/// `Delivered` and `Failed` are terminal — a record never changes again
/// once it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    InProgress,
    Delivered,
    Failed,
}

impl NotificationStatus {
    /// Whether the record accepts no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Map a raw provider status string onto the closed enumeration.
    ///
    /// Unknown strings map to `InProgress` — never to a terminal status,
    /// so a new provider vocabulary can't freeze a record early.
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "queued" | "accepted" | "scheduled" => Self::Queued,
            "initiated" | "ringing" | "in-progress" | "sending" | "sent" => Self::InProgress,
            "completed" | "delivered" | "answered" | "read" => Self::Delivered,
            "failed" | "busy" | "no-answer" | "canceled" | "undelivered" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {s}")),
        }
    }
}

/// One dispatch attempt — call, SMS, or WhatsApp message.
///
/// Inserted synchronously when the dispatch is attempted; the terminal
/// status arrives later from the provider and is applied idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique record ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Destination in E.164 (without transport prefixes).
    pub destination: String,
    /// Channel this went out on.
    pub channel: Channel,
    /// Provider reference id; absent when the provider never accepted.
    pub provider_ref: Option<String>,
    /// Current status.
    pub status: NotificationStatus,
    /// Call duration in seconds, voice only, set at terminal status.
    pub duration_secs: Option<i64>,
    /// How many emails the delivered digest covered.
    pub email_count: i64,
    /// When the dispatch was attempted.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Record for an accepted dispatch.
    pub fn accepted(
        user_id: &str,
        destination: &str,
        channel: Channel,
        provider_ref: String,
        status: NotificationStatus,
        email_count: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            destination: destination.to_string(),
            channel,
            provider_ref: Some(provider_ref),
            status,
            duration_secs: None,
            email_count,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a dispatch the provider never accepted.
    pub fn failed(user_id: &str, destination: &str, channel: Channel, email_count: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            destination: destination.to_string(),
            channel,
            provider_ref: None,
            status: NotificationStatus::Failed,
            duration_secs: None,
            email_count,
            created_at: now,
            updated_at: now,
        }
    }
}
