//! In-memory document store.
//!
//! Intended for tests and local runs. Mirrors the Postgres store's numbering
//! and version semantics under a single mutex.

use crate::error::{DocumentError, DocumentResult};
use crate::models::{
    AuditEntry, AuditQuery, ComplianceRecord, Document, DocumentStatus, LineItem,
    ListDocumentsFilter,
};
use crate::services::audit::AuditLog;
use crate::services::numbering::{format_number, next_in_scope, NumberScope};
use crate::services::store::DocumentStore;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<Uuid, Document>,
    lines: HashMap<Uuid, Vec<LineItem>>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn max_in_scope(&self, scope: &NumberScope) -> Option<i64> {
        self.documents
            .values()
            .filter(|d| {
                d.document_type == scope.document_type
                    && d.series == scope.series
                    && d.issue_date.year() == scope.year
            })
            .filter_map(|d| d.sequence_number)
            .max()
    }

    fn document_for_write(&mut self, document_id: Uuid) -> DocumentResult<&mut Document> {
        self.documents
            .get_mut(&document_id)
            .ok_or_else(|| DocumentError::not_found("document", document_id))
    }
}

fn check_version(current: &Document, expected_version: i64) -> DocumentResult<()> {
    if current.version != expected_version {
        return Err(DocumentError::Conflict(format!(
            "document {} was modified concurrently (expected version {}, found {})",
            current.document_id, expected_version, current.version
        )));
    }
    Ok(())
}

/// Copy the header fields `update_document` is allowed to change.
fn apply_header(target: &mut Document, source: &Document) {
    let number = target.number.take();
    let sequence_number = target.sequence_number.take();
    let compliance = std::mem::take(&mut target.compliance);
    let created_utc = target.created_utc;
    let created_by = std::mem::take(&mut target.created_by);
    let version = target.version;

    *target = source.clone();
    target.number = number;
    target.sequence_number = sequence_number;
    target.compliance = compliance;
    target.created_utc = created_utc;
    target.created_by = created_by;
    target.updated_utc = Utc::now();
    target.version = version + 1;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> DocumentResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| DocumentError::Persistence(anyhow::anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn health_check(&self) -> DocumentResult<()> {
        self.state().map(|_| ())
    }

    async fn insert_document(
        &self,
        document: &Document,
        lines: &[LineItem],
        scope: Option<&NumberScope>,
    ) -> DocumentResult<Document> {
        let mut state = self.state()?;
        if state.documents.contains_key(&document.document_id) {
            return Err(DocumentError::Conflict(format!(
                "document {} already exists",
                document.document_id
            )));
        }

        let mut stored = document.clone();
        if let Some(scope) = scope {
            let next = next_in_scope(state.max_in_scope(scope));
            stored.sequence_number = Some(next);
            stored.number = Some(format_number(&scope.series, next));
        }

        state.documents.insert(stored.document_id, stored.clone());
        state.lines.insert(stored.document_id, lines.to_vec());
        Ok(stored)
    }

    async fn assign_number(
        &self,
        document_id: Uuid,
        expected_version: i64,
        scope: &NumberScope,
    ) -> DocumentResult<Document> {
        let mut state = self.state()?;
        let next = next_in_scope(state.max_in_scope(scope));
        let document = state.document_for_write(document_id)?;
        check_version(document, expected_version)?;
        if document.sequence_number.is_some() {
            return Err(DocumentError::Conflict(format!(
                "document {} is already numbered",
                document_id
            )));
        }

        document.sequence_number = Some(next);
        document.number = Some(format_number(&scope.series, next));
        document.version += 1;
        document.updated_utc = Utc::now();
        Ok(document.clone())
    }

    async fn get_document(&self, document_id: Uuid) -> DocumentResult<Option<Document>> {
        Ok(self.state()?.documents.get(&document_id).cloned())
    }

    async fn get_lines(&self, document_id: Uuid) -> DocumentResult<Vec<LineItem>> {
        let mut lines = self
            .state()?
            .lines
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        lines.sort_by_key(|l| l.line_number);
        Ok(lines)
    }

    async fn list_documents(&self, filter: &ListDocumentsFilter) -> DocumentResult<Vec<Document>> {
        let state = self.state()?;
        let overdue_on = filter.overdue_on.unwrap_or_else(|| Utc::now().date_naive());
        let limit = filter.page_size.clamp(1, 100) as usize;

        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| filter.include_deleted || d.deleted_utc.is_none())
            .filter(|d| filter.document_type.is_none_or(|t| d.document_type == t))
            .filter(|d| match filter.status {
                Some(DocumentStatus::Overdue) => {
                    !matches!(
                        d.status,
                        DocumentStatus::Draft | DocumentStatus::Paid | DocumentStatus::Cancelled
                    ) && d.due_date.is_some_and(|due| due < overdue_on)
                        && d.balance_due > Decimal::ZERO
                }
                Some(status) => d.status == status,
                None => true,
            })
            .filter(|d| filter.series.as_ref().is_none_or(|s| d.series == *s))
            .filter(|d| {
                filter
                    .counterparty_vat_number
                    .as_ref()
                    .is_none_or(|vat| d.counterparty.vat_number.as_ref() == Some(vat))
            })
            .filter(|d| filter.issue_from.is_none_or(|from| d.issue_date >= from))
            .filter(|d| filter.issue_to.is_none_or(|to| d.issue_date <= to))
            .filter(|d| filter.page_token.is_none_or(|cursor| d.document_id > cursor))
            .cloned()
            .collect();

        documents.sort_by_key(|d| d.document_id);
        documents.truncate(limit);
        Ok(documents)
    }

    async fn update_document(
        &self,
        document: &Document,
        expected_version: i64,
    ) -> DocumentResult<Document> {
        let mut state = self.state()?;
        let current = state.document_for_write(document.document_id)?;
        check_version(current, expected_version)?;
        apply_header(current, document);
        Ok(current.clone())
    }

    async fn replace_lines(
        &self,
        document: &Document,
        lines: &[LineItem],
        expected_version: i64,
    ) -> DocumentResult<Document> {
        let mut state = self.state()?;
        let current = state.document_for_write(document.document_id)?;
        check_version(current, expected_version)?;
        apply_header(current, document);
        let updated = current.clone();
        state.lines.insert(document.document_id, lines.to_vec());
        Ok(updated)
    }

    async fn update_compliance(
        &self,
        document_id: Uuid,
        record: &ComplianceRecord,
        expected_version: Option<i64>,
    ) -> DocumentResult<Document> {
        let mut state = self.state()?;
        let current = state.document_for_write(document_id)?;
        if let Some(expected) = expected_version {
            check_version(current, expected)?;
        }
        current.compliance = record.clone();
        current.version += 1;
        current.updated_utc = Utc::now();
        Ok(current.clone())
    }

    async fn find_by_mark(&self, mark: &str) -> DocumentResult<Option<Document>> {
        Ok(self
            .state()?
            .documents
            .values()
            .find(|d| d.compliance.mark.as_deref() == Some(mark))
            .cloned())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> DocumentResult<()> {
        self.state()?.audit.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> DocumentResult<Vec<AuditEntry>> {
        let state = self.state()?;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        // Reversed first so entries sharing a timestamp stay newest first.
        entries.reverse();
        entries.sort_by(|a, b| b.occurred_utc.cmp(&a.occurred_utc));
        entries.truncate(query.limit.max(0) as usize);
        Ok(entries)
    }
}
