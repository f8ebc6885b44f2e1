//! Audit trail recorder.
//!
//! Recording is best effort: a failed append is logged and counted, and the
//! business operation that triggered it carries on.

use crate::error::DocumentResult;
use crate::models::{AuditEntry, AuditOutcome, AuditQuery};
use crate::services::metrics::AUDIT_FAILURES_TOTAL;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const MAX_QUERY_LIMIT: i64 = 1000;

/// Append-only audit storage.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> DocumentResult<()>;

    /// Matching entries, newest first, at most `query.limit`.
    async fn query(&self, query: &AuditQuery) -> DocumentResult<Vec<AuditEntry>>;
}

#[derive(Clone)]
pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    pub async fn record(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
        actor: &str,
        action: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let entry = AuditEntry {
            audit_id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            occurred_utc: Utc::now(),
            changes: diff_fields(before.as_ref(), after.as_ref()),
            outcome: AuditOutcome::Success,
            message: None,
        };
        self.append(entry).await;
    }

    pub async fn record_failure(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
        actor: &str,
        action: &str,
        message: &str,
    ) {
        let entry = AuditEntry {
            audit_id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            occurred_utc: Utc::now(),
            changes: Value::Object(Map::new()),
            outcome: AuditOutcome::Failure,
            message: Some(message.to_string()),
        };
        self.append(entry).await;
    }

    pub async fn query(&self, query: &AuditQuery) -> DocumentResult<Vec<AuditEntry>> {
        let query = AuditQuery {
            limit: query.limit.clamp(1, MAX_QUERY_LIMIT),
            ..query.clone()
        };
        self.log.query(&query).await
    }

    async fn append(&self, entry: AuditEntry) {
        if let Err(e) = self.log.append(&entry).await {
            AUDIT_FAILURES_TOTAL
                .with_label_values(&[entry.action.as_str()])
                .inc();
            warn!(
                error = %e,
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                action = %entry.action,
                "Failed to record audit entry"
            );
        }
    }
}

/// Serialize a value for diffing; `None` if it cannot be represented.
pub fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Top-level fields whose values differ, as `{ field: { before, after } }`.
pub fn diff_fields(before: Option<&Value>, after: Option<&Value>) -> Value {
    let empty = Map::new();
    let (before_map, after_map) = match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => (b, a),
        (Some(Value::Object(b)), None) => (b, &empty),
        (None, Some(Value::Object(a))) => (&empty, a),
        (None, None) => return Value::Object(Map::new()),
        (b, a) => {
            if b == a {
                return Value::Object(Map::new());
            }
            return json!({ "value": { "before": b, "after": a } });
        }
    };

    let mut changes = Map::new();
    for (key, old) in before_map {
        let new = after_map.get(key).unwrap_or(&Value::Null);
        if old != new {
            changes.insert(key.clone(), json!({ "before": old, "after": new }));
        }
    }
    for (key, new) in after_map {
        if !before_map.contains_key(key) && !new.is_null() {
            changes.insert(key.clone(), json!({ "before": Value::Null, "after": new }));
        }
    }
    Value::Object(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_keeps_only_changed_fields() {
        let before = json!({ "status": "draft", "total": "42.85", "notes": null });
        let after = json!({ "status": "pending", "total": "42.85", "notes": null });

        let diff = diff_fields(Some(&before), Some(&after));
        assert_eq!(
            diff,
            json!({ "status": { "before": "draft", "after": "pending" } })
        );
    }

    #[test]
    fn test_diff_of_creation_lists_all_set_fields() {
        let after = json!({ "status": "draft", "notes": null });
        let diff = diff_fields(None, Some(&after));
        assert_eq!(diff, json!({ "status": { "before": null, "after": "draft" } }));
    }

    #[test]
    fn test_diff_of_scalars() {
        let diff = diff_fields(Some(&json!(1)), Some(&json!(2)));
        assert_eq!(diff, json!({ "value": { "before": 1, "after": 2 } }));
        assert_eq!(diff_fields(Some(&json!(1)), Some(&json!(1))), json!({}));
    }
}
