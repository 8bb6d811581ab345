//! Fire-and-forget security audit trail.

use sqlx::PgPool;
use std::sync::Mutex;

use crate::models::AuditEvent;

/// Records audit events without blocking or failing the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events as structured logs on the `audit` target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            event_type = %event.event_type_code,
            user_id = ?event.user_id,
            username = ?event.username,
            client_ip = ?event.ip_address,
            data = ?event.event_data,
            "Audit event"
        );
    }
}

/// Persists events to `audit_events` on a spawned task. Write failures are logged and dropped.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, event: AuditEvent) {
        TracingAuditSink.record(event.clone());

        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_events (event_id, event_type_code, user_id, username, ip_address,
                    event_data, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id)
            .bind(&event.event_type_code)
            .bind(event.user_id)
            .bind(&event.username)
            .bind(&event.ip_address)
            .bind(&event.event_data)
            .bind(event.created_utc)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(event_id = %event.event_id, error = %e, "Failed to persist audit event");
            }
        });
    }
}

/// Keeps events in memory for assertions.
#[derive(Default)]
pub struct MockAuditSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.iter().map(|e| e.event_type_code.clone()).collect())
            .unwrap_or_default()
    }
}

impl AuditSink for MockAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
