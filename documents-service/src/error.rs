//! Error taxonomy for document operations.

use crate::models::AuthorityError;
use service_core::error::AppError;
use thiserror::Error;

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lost a race for a sequence number. Retried by the numbering generator.
    #[error("Number {number} already taken in scope {scope}")]
    NumberTaken { scope: String, number: i64 },

    #[error("Compliance authority rejected the document: {message}")]
    Compliance {
        message: String,
        errors: Vec<AuthorityError>,
        mark: Option<String>,
    },

    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),

    /// The authority certified the document but the outcome write failed.
    /// The mark must be reconciled by hand; resubmitting would report twice.
    #[error("Compliance mark {mark} was issued but could not be stored: {source}")]
    MarkNotStored {
        mark: String,
        uid: Option<String>,
        #[source]
        source: Box<DocumentError>,
    },

    #[error("Compliance authority timed out: {0}")]
    ExternalTimeout(String),

    #[error("Compliance authority call failed: {0}")]
    ExternalService(String),
}

impl DocumentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DocumentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Failures of the store or the authority transport, as opposed to a
    /// verdict on the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocumentError::Persistence(_)
                | DocumentError::ExternalTimeout(_)
                | DocumentError::ExternalService(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentError::Validation(_) => "validation",
            DocumentError::NotFound { .. } => "not_found",
            DocumentError::Conflict(_) | DocumentError::NumberTaken { .. } => "conflict",
            DocumentError::Compliance { .. } => "compliance",
            DocumentError::Persistence(_) => "persistence",
            DocumentError::MarkNotStored { .. } => "mark_not_stored",
            DocumentError::ExternalTimeout(_) => "external_timeout",
            DocumentError::ExternalService(_) => "external_service",
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation(msg) => AppError::ValidationError(msg),
            DocumentError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            DocumentError::Conflict(_) | DocumentError::NumberTaken { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            DocumentError::Compliance {
                ref message,
                ref errors,
                ..
            } => {
                let details = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                AppError::ValidationError(if details.is_empty() {
                    message.clone()
                } else {
                    format!("{} ({})", message, details)
                })
            }
            DocumentError::Persistence(e) => AppError::DatabaseError(e),
            DocumentError::MarkNotStored { .. } => {
                AppError::DatabaseError(anyhow::anyhow!(err.to_string()))
            }
            DocumentError::ExternalTimeout(msg) => AppError::GatewayTimeout(msg),
            DocumentError::ExternalService(msg) => AppError::BadGateway(msg),
        }
    }
}
