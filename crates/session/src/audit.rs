//! Application audit log.
//!
//! Fire-and-forget: callers never wait for the sink and never see its
//! failures. Every event is also mirrored to `tracing`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::demo::DemoMode;

/// Detail keys never written to the sink.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "confirmPassword",
    "confirm_password",
    "token",
    "access_token",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

/// One persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Page or component the event came from (`"Auth"`, ...).
    pub component: String,
    /// Action identifier (`"SIGN_IN_SUCCESS"`, ...).
    pub action: String,
    /// Sanitized details, JSON-encoded.
    pub details: String,
    pub level: AuditLevel,
    pub user_email: String,
    pub created_at: DateTime<Utc>,
}

/// Destination for audit records (usually an `app_logs` table).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Sink that drops everything; records still reach `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn write(&self, _record: AuditRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Returns the email of whoever is acting right now, if anyone.
pub type ActorAccessor = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Audit logger scoped to one session manager.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    actor: ActorAccessor,
    demo: DemoMode,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>, actor: ActorAccessor, demo: DemoMode) -> Self {
        Self { sink, actor, demo }
    }

    /// Record an event. Never blocks and never fails.
    ///
    /// Only events with a known actor outside demo mode reach the sink; the
    /// rest are traced only.
    pub fn log_event(&self, component: &str, action: &str, details: Value, level: AuditLevel) {
        let details = sanitize(details);
        trace_event(component, action, &details, level);

        if self.demo.is_enabled() {
            return;
        }
        let Some(user_email) = (self.actor)() else {
            // Not signed in (yet); nobody to attribute the record to.
            return;
        };

        let record = AuditRecord {
            id: Uuid::now_v7(),
            component: component.to_string(),
            action: action.to_string(),
            details: details.to_string(),
            level,
            user_email,
            created_at: Utc::now(),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(action, "no runtime available; audit record dropped");
            return;
        };
        let sink = Arc::clone(&self.sink);
        runtime.spawn(async move {
            if let Err(err) = sink.write(record).await {
                tracing::warn!(error = %err, "failed to write audit record");
            }
        });
    }

    pub fn info(&self, component: &str, action: &str, details: Value) {
        self.log_event(component, action, details, AuditLevel::Info);
    }

    pub fn error(&self, component: &str, action: &str, details: Value) {
        self.log_event(component, action, details, AuditLevel::Error);
    }
}

impl core::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditLog").field("demo", &self.demo).finish_non_exhaustive()
    }
}

fn sanitize(details: Value) -> Value {
    match details {
        Value::Object(mut map) => {
            for key in SENSITIVE_KEYS {
                map.remove(*key);
            }
            Value::Object(map)
        }
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn trace_event(component: &str, action: &str, details: &Value, level: AuditLevel) {
    match level {
        AuditLevel::Info => tracing::info!(component, action, %details, "audit"),
        AuditLevel::Warn => tracing::warn!(component, action, %details, "audit"),
        AuditLevel::Error => tracing::error!(component, action, %details, "audit"),
    }
}
