//! Persistence seam for document headers and lines.

use crate::error::DocumentResult;
use crate::models::{ComplianceRecord, Document, LineItem, ListDocumentsFilter};
use crate::services::numbering::NumberScope;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage for document aggregates.
///
/// Every write that takes an `expected_version` is a compare-and-set: it
/// fails with `Conflict` when the stored version differs, and on success the
/// returned document carries the incremented version.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn health_check(&self) -> DocumentResult<()>;

    /// Insert a header with its lines atomically.
    ///
    /// With a `scope`, the next sequence number in that scope is allocated in
    /// the same transaction. A lost race yields `NumberTaken`.
    async fn insert_document(
        &self,
        document: &Document,
        lines: &[LineItem],
        scope: Option<&NumberScope>,
    ) -> DocumentResult<Document>;

    /// Allocate and write a number for a document that has none yet.
    async fn assign_number(
        &self,
        document_id: Uuid,
        expected_version: i64,
        scope: &NumberScope,
    ) -> DocumentResult<Document>;

    /// Fetch a header, including soft-deleted ones.
    async fn get_document(&self, document_id: Uuid) -> DocumentResult<Option<Document>>;

    async fn get_lines(&self, document_id: Uuid) -> DocumentResult<Vec<LineItem>>;

    async fn list_documents(&self, filter: &ListDocumentsFilter) -> DocumentResult<Vec<Document>>;

    /// Write the mutable header fields. Number and compliance fields are untouched.
    async fn update_document(
        &self,
        document: &Document,
        expected_version: i64,
    ) -> DocumentResult<Document>;

    /// Replace all lines and write the recomputed header in one transaction.
    async fn replace_lines(
        &self,
        document: &Document,
        lines: &[LineItem],
        expected_version: i64,
    ) -> DocumentResult<Document>;

    /// Write the compliance record. Without `expected_version` the write is
    /// unconditional; the version is incremented either way.
    async fn update_compliance(
        &self,
        document_id: Uuid,
        record: &ComplianceRecord,
        expected_version: Option<i64>,
    ) -> DocumentResult<Document>;

    async fn find_by_mark(&self, mark: &str) -> DocumentResult<Option<Document>>;
}
