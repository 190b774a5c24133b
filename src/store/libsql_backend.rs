//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored
//! as RFC 3339 text and parsed leniently on the way out.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::dispatch::model::{Channel, NotificationRecord, NotificationStatus};
use crate::error::DatabaseError;
use crate::store::traits::{Database, ObservedMessage};
use crate::triage::model::{Category, CategoryRule, Sender, domain_of};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and create the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_sender(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<Option<Sender>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SENDER_COLUMNS} FROM senders WHERE user_id = ?1 AND email = ?2"),
                params![user_id, email],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(
                row_to_sender(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_i64(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

const SENDER_COLUMNS: &str = "id, user_id, email, domain, display_name, category, last_message_at, message_count, last_subject, last_preview";

const RULE_COLUMNS: &str = "id, user_id, domain, category, reason, created_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, destination, channel, provider_ref, status, duration_secs, email_count, created_at, updated_at";

/// Map a libsql Row to a Sender. Column order matches SENDER_COLUMNS.
fn row_to_sender(row: &libsql::Row) -> Result<Sender, libsql::Error> {
    let id_str: String = row.get(0)?;
    let category_str: String = row.get(5)?;
    let last_message_str: String = row.get(6)?;

    Ok(Sender {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        email: row.get(2)?,
        domain: row.get(3)?,
        display_name: row.get(4).ok(),
        category: category_str.parse().unwrap_or(Category::Unassigned),
        last_message_at: parse_datetime(&last_message_str),
        message_count: row.get(7)?,
        last_subject: row.get(8).ok(),
        last_preview: row.get(9).ok(),
    })
}

/// Map a libsql Row to a CategoryRule. Column order matches RULE_COLUMNS.
fn row_to_rule(row: &libsql::Row) -> Result<CategoryRule, libsql::Error> {
    let id_str: String = row.get(0)?;
    let category_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;

    Ok(CategoryRule {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        domain: row.get(2)?,
        category: category_str.parse().unwrap_or(Category::Unassigned),
        reason: row.get(4)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a NotificationRecord. Column order matches NOTIFICATION_COLUMNS.
fn row_to_notification(row: &libsql::Row) -> Result<NotificationRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let channel_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(NotificationRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        destination: row.get(2)?,
        channel: channel_str.parse().unwrap_or(Channel::Sms),
        provider_ref: row.get(4).ok(),
        status: status_str.parse().unwrap_or(NotificationStatus::Queued),
        duration_secs: row.get(6).ok(),
        email_count: row.get(7)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let statements = [
            "CREATE TABLE IF NOT EXISTS senders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                email TEXT NOT NULL,
                domain TEXT NOT NULL,
                display_name TEXT,
                category TEXT NOT NULL DEFAULT 'unassigned',
                last_message_at TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                last_subject TEXT,
                last_preview TEXT,
                UNIQUE (user_id, email)
            )",
            "CREATE TABLE IF NOT EXISTS category_rules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                category TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE (user_id, domain)
            )",
            "CREATE TABLE IF NOT EXISTS notification_log (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                destination TEXT NOT NULL,
                channel TEXT NOT NULL,
                provider_ref TEXT,
                status TEXT NOT NULL,
                duration_secs INTEGER,
                email_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_senders_user ON senders (user_id, last_message_at)",
            "CREATE INDEX IF NOT EXISTS idx_notification_user ON notification_log (user_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_notification_ref ON notification_log (provider_ref)",
        ];
        for sql in statements {
            conn.execute(sql, ())
                .await
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
        }
        Ok(())
    }

    // ── Senders ─────────────────────────────────────────────────────

    async fn record_message(
        &self,
        user_id: &str,
        message: &ObservedMessage,
    ) -> Result<Sender, DatabaseError> {
        let domain = domain_of(&message.email);
        self.conn()
            .execute(
                "INSERT INTO senders (id, user_id, email, domain, display_name, category, last_message_at, message_count, last_subject, last_preview)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'unassigned', ?6, 1, ?7, ?8)
                 ON CONFLICT (user_id, email) DO UPDATE SET
                    message_count = message_count + 1,
                    last_message_at = excluded.last_message_at,
                    display_name = COALESCE(excluded.display_name, senders.display_name),
                    last_subject = excluded.last_subject,
                    last_preview = excluded.last_preview",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    message.email.as_str(),
                    domain,
                    opt_text(message.display_name.as_deref()),
                    message.received_at.to_rfc3339(),
                    opt_text(message.subject.as_deref()),
                    opt_text(message.preview.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        self.get_sender(user_id, &message.email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "sender".into(),
                id: message.email.clone(),
            })
    }

    async fn set_sender_category(
        &self,
        user_id: &str,
        email: &str,
        category: Category,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE senders SET category = ?3 WHERE user_id = ?1 AND email = ?2",
                params![user_id, email, category.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "sender".into(),
                id: email.to_string(),
            });
        }
        Ok(())
    }

    async fn list_senders(&self, user_id: &str) -> Result<Vec<Sender>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SENDER_COLUMNS} FROM senders WHERE user_id = ?1 ORDER BY last_message_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut senders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            senders.push(row_to_sender(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(senders)
    }

    // ── Category rules ──────────────────────────────────────────────

    async fn upsert_rule(&self, rule: &CategoryRule) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO category_rules (id, user_id, domain, category, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id, domain) DO UPDATE SET
                    category = excluded.category,
                    reason = excluded.reason,
                    created_at = excluded.created_at",
                params![
                    rule.id.to_string(),
                    rule.user_id.as_str(),
                    rule.domain.to_ascii_lowercase(),
                    rule.category.to_string(),
                    rule.reason.as_str(),
                    rule.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn delete_rule(&self, user_id: &str, domain: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM category_rules WHERE user_id = ?1 AND domain = ?2",
                params![user_id, domain.to_ascii_lowercase()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM category_rules WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            rules.push(row_to_rule(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(rules)
    }

    // ── Notification log ────────────────────────────────────────────

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO notification_log ({NOTIFICATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.id.to_string(),
                    record.user_id.as_str(),
                    record.destination.as_str(),
                    record.channel.to_string(),
                    opt_text(record.provider_ref.as_deref()),
                    record.status.to_string(),
                    opt_i64(record.duration_secs),
                    record.email_count,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_notification(
        &self,
        id: Uuid,
    ) -> Result<Option<NotificationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notification_log WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(
                row_to_notification(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn update_notification_status(
        &self,
        provider_ref: &str,
        status: NotificationStatus,
        duration_secs: Option<i64>,
    ) -> Result<bool, DatabaseError> {
        // Terminal rows are immutable; re-applying the same terminal
        // status is a no-op, which makes duplicate provider callbacks safe.
        let changed = self
            .conn()
            .execute(
                "UPDATE notification_log
                 SET status = ?2,
                     duration_secs = COALESCE(?3, duration_secs),
                     updated_at = ?4
                 WHERE provider_ref = ?1
                   AND status NOT IN ('delivered', 'failed')",
                params![
                    provider_ref,
                    status.to_string(),
                    opt_i64(duration_secs),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notification_log
                     WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            records
                .push(row_to_notification(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(records)
    }

    async fn count_notifications_since(
        &self,
        user_id: &str,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM notification_log
                 WHERE user_id = ?1 AND channel = ?2 AND created_at >= ?3",
                params![user_id, channel.to_string(), since.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => row.get(0).map_err(|e| DatabaseError::Query(e.to_string())),
            None => Ok(0),
        }
    }
}
