//! Compliance record tracked alongside each document header.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Submission status towards the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    #[default]
    NotSubmitted,
    Pending,
    Submitted,
    Accepted,
    Rejected,
    Cancelled,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::NotSubmitted => "not_submitted",
            ComplianceStatus::Pending => "pending",
            ComplianceStatus::Submitted => "submitted",
            ComplianceStatus::Accepted => "accepted",
            ComplianceStatus::Rejected => "rejected",
            ComplianceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_submitted" => Some(ComplianceStatus::NotSubmitted),
            "pending" => Some(ComplianceStatus::Pending),
            "submitted" => Some(ComplianceStatus::Submitted),
            "accepted" => Some(ComplianceStatus::Accepted),
            "rejected" => Some(ComplianceStatus::Rejected),
            "cancelled" => Some(ComplianceStatus::Cancelled),
            _ => None,
        }
    }

    /// Outcomes the authority will not change on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComplianceStatus::Accepted | ComplianceStatus::Rejected | ComplianceStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation error reported by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComplianceRecord {
    pub status: ComplianceStatus,
    pub mark: Option<String>,
    pub uid: Option<String>,
    pub cancellation_mark: Option<String>,
    pub submitted_utc: Option<DateTime<Utc>>,
    /// Time of the latest submission attempt, used to expire stale pending claims.
    pub attempted_utc: Option<DateTime<Utc>>,
    pub errors: Vec<AuthorityError>,
}

impl ComplianceRecord {
    /// A mark the authority still considers live.
    pub fn is_certified(&self) -> bool {
        self.mark.is_some()
            && matches!(
                self.status,
                ComplianceStatus::Submitted | ComplianceStatus::Accepted
            )
    }
}
