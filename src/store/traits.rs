//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dispatch::model::{Channel, NotificationRecord, NotificationStatus};
use crate::error::DatabaseError;
use crate::triage::model::{Category, CategoryRule, Sender};

/// One observed inbound email, as delivered by the (out of scope)
/// fetching layer. Drives the sender upsert.
#[derive(Debug, Clone)]
pub struct ObservedMessage {
    pub email: String,
    pub display_name: Option<String>,
    pub subject: Option<String>,
    pub preview: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering senders, rules, and the
/// notification log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create tables if they don't exist.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Senders ─────────────────────────────────────────────────────

    /// Upsert a sender from one observed message: created on first
    /// contact, bumped (count, timestamps, latest subject/preview) on
    /// every subsequent one. Returns the stored sender.
    async fn record_message(
        &self,
        user_id: &str,
        message: &ObservedMessage,
    ) -> Result<Sender, DatabaseError>;

    /// Set a sender's stored category (AI- or user-assigned; `Unassigned` resets).
    async fn set_sender_category(
        &self,
        user_id: &str,
        email: &str,
        category: Category,
    ) -> Result<(), DatabaseError>;

    /// All senders for a user.
    async fn list_senders(&self, user_id: &str) -> Result<Vec<Sender>, DatabaseError>;

    // ── Category rules ──────────────────────────────────────────────

    /// Upsert the rule for (user, domain) — at most one may exist.
    async fn upsert_rule(&self, rule: &CategoryRule) -> Result<(), DatabaseError>;

    /// Delete the rule for (user, domain). Returns whether one existed.
    async fn delete_rule(&self, user_id: &str, domain: &str) -> Result<bool, DatabaseError>;

    /// All rules for a user.
    async fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>, DatabaseError>;

    // ── Notification log ────────────────────────────────────────────

    /// Insert one dispatch attempt.
    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError>;

    /// Get a notification by ID.
    async fn get_notification(
        &self,
        id: Uuid,
    ) -> Result<Option<NotificationRecord>, DatabaseError>;

    /// Apply a provider status update by provider reference id.
    ///
    /// Idempotent: records already at a terminal status are left
    /// untouched. Returns whether a row changed.
    async fn update_notification_status(
        &self,
        provider_ref: &str,
        status: NotificationStatus,
        duration_secs: Option<i64>,
    ) -> Result<bool, DatabaseError>;

    /// Dispatch history for a user, most recent first.
    async fn list_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DatabaseError>;

    /// Count dispatches for (user, channel) attempted since `since`.
    /// Supports the caller's already-notified-today dedup.
    async fn count_notifications_since(
        &self,
        user_id: &str,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;
}
