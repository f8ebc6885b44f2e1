//! Audit trail entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditOutcome::Success),
            "failure" => Some(AuditOutcome::Failure),
            _ => None,
        }
    }
}

/// Append-only record of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: String,
    pub action: String,
    pub occurred_utc: DateTime<Utc>,
    /// Field-level diff: `{ field: { "before": .., "after": .. } }`.
    pub changes: serde_json::Value,
    pub outcome: AuditOutcome,
    pub message: Option<String>,
}

/// Read-side filter. Results are newest first.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            entity_id: None,
            actor: None,
            action: None,
            from: None,
            to: None,
            limit: 100,
        }
    }
}

impl AuditQuery {
    pub fn for_entity(entity_type: &str, entity_id: impl ToString) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type
            .as_ref()
            .is_none_or(|t| *t == entry.entity_type)
            && self.entity_id.as_ref().is_none_or(|id| *id == entry.entity_id)
            && self.actor.as_ref().is_none_or(|a| *a == entry.actor)
            && self.action.as_ref().is_none_or(|a| *a == entry.action)
            && self.from.is_none_or(|from| entry.occurred_utc >= from)
            && self.to.is_none_or(|to| entry.occurred_utc <= to)
    }
}
