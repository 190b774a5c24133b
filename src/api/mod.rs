//! REST endpoints — the boundary consumed by the (out of scope) UI layer.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::DigestConfig;
use crate::digest::{DigestGenerator, DigestScript};
use crate::dispatch::{Channel, ChannelDispatcher, NotificationRecord, NotificationStatus};
use crate::error::Error;
use crate::store::{Database, ObservedMessage};
use crate::triage::{Category, CategoryRule, CategoryRuleEngine};
use crate::verify::VerificationSessionManager;

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub generator: Arc<DigestGenerator>,
    pub verifier: Arc<VerificationSessionManager>,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub digest_config: DigestConfig,
}

/// Build the REST routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/digest", post(request_digest))
        .route("/api/verify/send-code", post(send_code))
        .route("/api/verify/check-code", post(check_code))
        .route("/api/notifications/status", post(status_callback))
        .route("/api/notifications", get(list_notifications))
        .route("/api/senders", get(list_senders))
        .route("/api/senders/observe", post(observe_message))
        .route("/api/senders/category", put(set_category))
        .route("/api/rules", put(upsert_rule).delete(delete_rule))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a service error onto a status code and a stable reason string.
fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    use crate::error::{DispatchError, ProviderError, VerifyError};
    let (status, reason) = match e {
        Error::Verify(v) => {
            let status = match v {
                VerifyError::NoSession => StatusCode::NOT_FOUND,
                VerifyError::CodeExpired => StatusCode::GONE,
                VerifyError::CodeMismatch { .. } => StatusCode::BAD_REQUEST,
                VerifyError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
                VerifyError::AlreadyVerified => StatusCode::CONFLICT,
            };
            (status, v.reason())
        }
        Error::Dispatch(d) => {
            let status = match d {
                DispatchError::NotVerified { .. } => StatusCode::FORBIDDEN,
                DispatchError::MalformedDestination { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, d.reason())
        }
        Error::Provider(p) => {
            let status = match p {
                ProviderError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, "provider_unavailable")
        }
        Error::Database(_) | Error::Config(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    let mut body = serde_json::json!({
        "ok": false,
        "reason": reason,
        "message": e.to_string(),
    });
    if let Error::Provider(crate::error::ProviderError::Unavailable {
        retry_after: Some(d),
        ..
    }) = e
    {
        body["retry_after_secs"] = serde_json::json!(d.as_secs());
    }
    (status, Json(body))
}

// ── Digest ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DigestRequest {
    user_id: String,
    /// Delivery channel; defaults to voice.
    channel: Option<Channel>,
    /// Destination phone in E.164. Without one the digest is returned
    /// but not dispatched.
    destination: Option<String>,
    /// Preferred synthesis voice id (voice channel only).
    voice: Option<String>,
    /// Dispatch even if this user was already notified on this channel
    /// inside the dedup window.
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct DigestResponse {
    ok: bool,
    script: DigestScript,
    record: Option<NotificationRecord>,
    already_notified: bool,
}

/// POST /api/digest
///
/// Generates the digest and optionally dispatches it. The
/// already-notified-today dedup lives here — the dispatcher's caller —
/// so audit records stay one-per-attempt.
async fn request_digest(
    State(state): State<ApiState>,
    Json(req): Json<DigestRequest>,
) -> impl IntoResponse {
    let script = match state.generator.generate(&req.user_id).await {
        Ok(script) => script,
        Err(e) => return error_response(&e).into_response(),
    };

    let Some(destination) = req.destination else {
        return Json(DigestResponse {
            ok: true,
            script,
            record: None,
            already_notified: false,
        })
        .into_response();
    };

    let channel = req.channel.unwrap_or(Channel::Voice);
    let window_start = Utc::now()
        - chrono::Duration::from_std(state.digest_config.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
    let already_notified = match state
        .db
        .count_notifications_since(&req.user_id, channel, window_start)
        .await
    {
        Ok(count) => count > 0,
        Err(e) => return error_response(&Error::Database(e)).into_response(),
    };

    if already_notified && !req.force {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "ok": false,
                "reason": "already_notified",
                "message": "This user already received a digest on this channel today; pass force to send another",
            })),
        )
            .into_response();
    }

    match state
        .dispatcher
        .dispatch(
            &req.user_id,
            &destination,
            channel,
            &script,
            req.voice.as_deref(),
        )
        .await
    {
        Ok(record) => Json(DigestResponse {
            ok: true,
            script,
            record: Some(record),
            already_notified,
        })
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Verification ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendCodeRequest {
    user_id: String,
    phone: String,
}

#[derive(Debug, Deserialize)]
struct CheckCodeRequest {
    user_id: String,
    phone: String,
    code: String,
}

/// POST /api/verify/send-code
async fn send_code(
    State(state): State<ApiState>,
    Json(req): Json<SendCodeRequest>,
) -> impl IntoResponse {
    match state.verifier.send_code(&req.user_id, &req.phone).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// POST /api/verify/check-code
async fn check_code(
    State(state): State<ApiState>,
    Json(req): Json<CheckCodeRequest>,
) -> impl IntoResponse {
    match state
        .verifier
        .verify_code(&req.user_id, &req.phone, &req.code)
        .await
    {
        Ok(()) => Json(serde_json::json!({"ok": true, "state": "verified"})).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Notification log ────────────────────────────────────────────────

/// Provider status callback, form-encoded. Field names follow the
/// telephony provider's webhook contract.
#[derive(Debug, Deserialize)]
struct StatusCallback {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "MessageSid")]
    message_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    call_status: Option<String>,
    #[serde(rename = "MessageStatus")]
    message_status: Option<String>,
    #[serde(rename = "CallDuration")]
    call_duration: Option<String>,
}

/// POST /api/notifications/status
///
/// Always answers 200 so the provider doesn't loop on redelivery; the
/// update itself is idempotent, so duplicates are harmless.
async fn status_callback(
    State(state): State<ApiState>,
    Form(cb): Form<StatusCallback>,
) -> impl IntoResponse {
    let sid = cb.call_sid.or(cb.message_sid);
    let raw_status = cb.call_status.or(cb.message_status);
    let (Some(sid), Some(raw_status)) = (sid, raw_status) else {
        return (
            StatusCode::OK,
            Json(serde_json::json!({"ok": false, "reason": "missing_fields"})),
        );
    };

    let status = NotificationStatus::from_provider(&raw_status);
    let duration = cb.call_duration.and_then(|d| d.parse::<i64>().ok());

    match state
        .db
        .update_notification_status(&sid, status, duration)
        .await
    {
        Ok(applied) => {
            info!(sid, %status, applied, "Provider status callback");
            (
                StatusCode::OK,
                Json(serde_json::json!({"ok": true, "applied": applied})),
            )
        }
        Err(e) => {
            // Still 200: the provider will redeliver, and the update is
            // idempotent once the database comes back.
            tracing::error!(sid, error = %e, "Status callback update failed");
            (
                StatusCode::OK,
                Json(serde_json::json!({"ok": false, "reason": "internal_error"})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

/// GET /api/notifications?user_id=…&limit=…
async fn list_notifications(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state
        .db
        .list_notifications(&q.user_id, q.limit.unwrap_or(50))
        .await
    {
        Ok(records) => Json(serde_json::json!({"ok": true, "notifications": records}))
            .into_response(),
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}

// ── Senders & rules ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ObserveRequest {
    user_id: String,
    email: String,
    display_name: Option<String>,
    subject: Option<String>,
    preview: Option<String>,
    received_at: Option<DateTime<Utc>>,
}

/// POST /api/senders/observe
async fn observe_message(
    State(state): State<ApiState>,
    Json(req): Json<ObserveRequest>,
) -> impl IntoResponse {
    let message = ObservedMessage {
        email: req.email,
        display_name: req.display_name,
        subject: req.subject,
        preview: req.preview,
        received_at: req.received_at.unwrap_or_else(Utc::now),
    };
    match state.db.record_message(&req.user_id, &message).await {
        Ok(sender) => Json(serde_json::json!({"ok": true, "sender": sender})).into_response(),
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SetCategoryRequest {
    user_id: String,
    email: String,
    category: Category,
}

/// PUT /api/senders/category
async fn set_category(
    State(state): State<ApiState>,
    Json(req): Json<SetCategoryRequest>,
) -> impl IntoResponse {
    match state
        .db
        .set_sender_category(&req.user_id, &req.email, req.category)
        .await
    {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SendersQuery {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct SenderView {
    #[serde(flatten)]
    sender: crate::triage::Sender,
    /// Effective bucket after applying the user's domain rules.
    resolved_category: Category,
}

/// GET /api/senders?user_id=…
async fn list_senders(
    State(state): State<ApiState>,
    Query(q): Query<SendersQuery>,
) -> impl IntoResponse {
    let rules = match state.db.list_rules(&q.user_id).await {
        Ok(rules) => rules,
        Err(e) => return error_response(&Error::Database(e)).into_response(),
    };
    match state.db.list_senders(&q.user_id).await {
        Ok(senders) => {
            let views: Vec<SenderView> = senders
                .into_iter()
                .map(|s| {
                    let resolved_category = CategoryRuleEngine::resolve_category(&s, &rules);
                    SenderView {
                        sender: s,
                        resolved_category,
                    }
                })
                .collect();
            Json(serde_json::json!({"ok": true, "senders": views})).into_response()
        }
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UpsertRuleRequest {
    user_id: String,
    domain: String,
    category: Category,
    #[serde(default)]
    reason: String,
}

/// PUT /api/rules
async fn upsert_rule(
    State(state): State<ApiState>,
    Json(req): Json<UpsertRuleRequest>,
) -> impl IntoResponse {
    let rule = CategoryRule {
        id: uuid::Uuid::new_v4(),
        user_id: req.user_id,
        domain: req.domain,
        category: req.category,
        reason: req.reason,
        created_at: Utc::now(),
    };
    match state.db.upsert_rule(&rule).await {
        Ok(()) => Json(serde_json::json!({"ok": true, "rule": rule})).into_response(),
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteRuleRequest {
    user_id: String,
    domain: String,
}

/// DELETE /api/rules
async fn delete_rule(
    State(state): State<ApiState>,
    Json(req): Json<DeleteRuleRequest>,
) -> impl IntoResponse {
    match state.db.delete_rule(&req.user_id, &req.domain).await {
        Ok(deleted) => Json(serde_json::json!({"ok": true, "deleted": deleted})).into_response(),
        Err(e) => error_response(&Error::Database(e)).into_response(),
    }
}
