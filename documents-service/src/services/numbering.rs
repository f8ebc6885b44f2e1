//! Sequential document numbering.
//!
//! Numbers are unique per (document type, series, issue year). The store
//! allocates `MAX + 1` inside the transaction that writes the number; a lost
//! race surfaces as `NumberTaken` and is retried here a bounded number of times.

use crate::config::NumberingConfig;
use crate::error::{DocumentError, DocumentResult};
use crate::models::DocumentType;
use crate::services::metrics::NUMBER_COLLISIONS_TOTAL;
use chrono::{Datelike, NaiveDate};
use service_core::retry::{retry_async, RetryConfig};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SERIES: &str = "A";
const MAX_SERIES_LEN: usize = 10;

/// Scope within which sequence numbers are unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumberScope {
    pub document_type: DocumentType,
    pub series: String,
    pub year: i32,
}

impl NumberScope {
    pub fn new(document_type: DocumentType, series: &str, issue_date: NaiveDate) -> Self {
        Self {
            document_type,
            series: series.to_string(),
            year: issue_date.year(),
        }
    }

    /// Key for the transaction-scoped advisory lock.
    pub fn lock_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NumberScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.document_type, self.series, self.year)
    }
}

/// Canonical display form: `SERIES-NNNNNN`.
pub fn format_number(series: &str, sequence: i64) -> String {
    format!("{}-{:06}", series, sequence)
}

/// Next number given the highest one already used in the scope.
pub fn next_in_scope(current_max: Option<i64>) -> i64 {
    current_max.unwrap_or(0) + 1
}

pub fn normalize_series(series: Option<&str>) -> DocumentResult<String> {
    let series = match series.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_SERIES.to_string()),
        Some(s) => s.to_uppercase(),
    };

    if series.len() > MAX_SERIES_LEN || !series.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DocumentError::Validation(format!(
            "series '{}' must be 1-{} letters or digits",
            series, MAX_SERIES_LEN
        )));
    }
    Ok(series)
}

/// Retries number allocation when a concurrent writer took the same number.
#[derive(Debug, Clone)]
pub struct NumberingGenerator {
    retry: RetryConfig,
}

impl NumberingGenerator {
    pub fn new(config: &NumberingConfig) -> Self {
        Self {
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.initial_backoff_ms.saturating_mul(20)),
                ..RetryConfig::with_max_attempts(config.max_attempts)
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.max_retries + 1
    }

    /// Run `attempt` until it stops failing with `NumberTaken`.
    ///
    /// Each attempt must allocate and write the number in one transaction.
    /// Exhausting the attempts yields `Conflict`.
    pub async fn allocate<T, F, Fut>(&self, scope: &NumberScope, attempt: F) -> DocumentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DocumentResult<T>>,
    {
        let result = retry_async(
            &self.retry,
            "allocate_document_number",
            |e: &DocumentError| {
                let taken = matches!(e, DocumentError::NumberTaken { .. });
                if taken {
                    NUMBER_COLLISIONS_TOTAL
                        .with_label_values(&[scope.document_type.as_str()])
                        .inc();
                }
                taken
            },
            attempt,
        )
        .await;

        match result {
            Err(DocumentError::NumberTaken { number, .. }) => {
                warn!(scope = %scope, number, "Number allocation exhausted retries");
                Err(DocumentError::Conflict(format!(
                    "could not allocate a number in scope {} after {} attempts",
                    scope,
                    self.max_attempts()
                )))
            }
            other => other,
        }
    }
}
