//! Security audit trail.
//!
//! Store writes publish events on a broadcast bus; a listener task appends them to
//! `security_audit`, chaining each row to the previous one with a SHA-256 hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::AppResult;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, subject: Option<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            subject,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The record state at the time of the action
    pub record: Value,
    /// Severity level for retention policy
    pub severity: Severity,
}

/// Publishes `<entity_type>.<action>` for any `Loggable` record.
pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, entity: &T) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        record: serde_json::to_value(entity).unwrap_or_default(),
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        Some(entity.subject()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // No receiver means auditing is not running; the write itself already succeeded.
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("Security audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = persist_event(&pool, &event).await {
                    tracing::error!("Failed to save security audit event: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "security audit listener lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("Security audit listener stopped");
}

/// Appends one event to the hash chain.
pub async fn persist_event(pool: &SqlitePool, event: &Value) -> AppResult<()> {
    let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let subject = event.get("subject").and_then(|v| v.as_str());
    let occurred_at = event
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let severity = event
        .get("payload")
        .and_then(|p| p.get("severity"))
        .and_then(|s| s.as_str())
        .unwrap_or(Severity::default().as_str());

    let payload = serde_json::to_string(event).unwrap_or_default();

    let mut tx = pool.begin().await?;

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM security_audit ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;

    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        r#"
        INSERT INTO security_audit (id, event_name, subject, occurred_at, payload, severity, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(subject)
    .bind(occurred_at.to_rfc3339())
    .bind(&payload)
    .bind(severity)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// SHA256(prev_hash || payload), hex encoded.
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(ph) = prev_hash {
        hasher.update(ph.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walks the audit table in insertion order and recomputes every link.
/// Returns the number of verified rows, or the sequence number of the first broken link.
pub async fn verify_audit_chain(pool: &SqlitePool) -> AppResult<Result<usize, i64>> {
    let rows = sqlx::query("SELECT seq, payload, prev_hash, hash FROM security_audit ORDER BY seq")
        .fetch_all(pool)
        .await?;

    let mut previous: Option<String> = None;
    for row in &rows {
        let seq: i64 = row.try_get("seq")?;
        let payload: String = row.try_get("payload")?;
        let prev_hash: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        if prev_hash != previous || chain_hash(prev_hash.as_deref(), &payload) != hash {
            return Ok(Err(seq));
        }
        previous = Some(hash);
    }

    Ok(Ok(rows.len()))
}
