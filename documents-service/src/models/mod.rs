//! Domain models for documents-service.

mod audit;
mod compliance;
mod document;
mod line_item;

pub use audit::{AuditEntry, AuditOutcome, AuditQuery};
pub use compliance::{AuthorityError, ComplianceRecord, ComplianceStatus};
pub use document::{
    Counterparty, CreateDocument, Document, DocumentStatus, DocumentTotals, DocumentType,
    DocumentWithLines, HeaderAdjustments, ListDocumentsFilter, PaymentMethod, UpdateDocument,
};
pub use line_item::{LineDiscount, LineItem, NewLineItem, UpdateLineItem, VatCategory};
