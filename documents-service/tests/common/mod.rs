//! Common test utilities for documents-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use documents_service::config::{IssuerConfig, NumberingConfig};
use documents_service::error::{DocumentError, DocumentResult};
use documents_service::models::{
    AuditEntry, AuditQuery, ComplianceRecord, Counterparty, CreateDocument, Document,
    DocumentType, HeaderAdjustments, LineDiscount, LineItem, ListDocumentsFilter, NewLineItem,
    PaymentMethod, VatCategory,
};
use documents_service::services::compliance::{
    DocStatusResponse, ErrorList, InvoicesDoc, ResponseDoc, ResponseError, ResponseItem,
};
use documents_service::services::{
    AuditLog, AuditRecorder, ComplianceAuthority, ComplianceGateway, DocumentService,
    DocumentStore, MemoryStore, NumberScope, NumberingGenerator, TextRenderer,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,documents_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ACTOR: &str = "alice";

pub fn issuer() -> IssuerConfig {
    IssuerConfig {
        vat_number: "123456789".to_string(),
        country: "GR".to_string(),
        branch: 0,
        name: Some("Test Issuer".to_string()),
    }
}

pub fn issue_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

pub fn line(description: &str, quantity: Decimal, unit_price: Decimal, vat: VatCategory) -> NewLineItem {
    NewLineItem {
        description: description.to_string(),
        quantity,
        unit: "pcs".to_string(),
        unit_price,
        discount: LineDiscount::None,
        vat_category: vat,
        income_classification: None,
    }
}

/// Three units at 10.00 (24% VAT) and one at 5.00 (13% VAT): total 42.85.
pub fn two_line_invoice() -> CreateDocument {
    CreateDocument {
        document_type: DocumentType::Invoice,
        series: Some("A".to_string()),
        issue_date: issue_date(),
        due_date: None,
        counterparty: Counterparty {
            name: "Acme Ltd".to_string(),
            vat_number: Some("987654321".to_string()),
            country: Some("GR".to_string()),
            ..Default::default()
        },
        currency: "EUR".to_string(),
        exchange_rate: dec!(1),
        payment_method: PaymentMethod::BankTransfer,
        payment_terms: Some("Net 30".to_string()),
        adjustments: HeaderAdjustments::default(),
        notes: None,
        lines: vec![
            line("Consulting", dec!(3), dec!(10.00), VatCategory::Normal),
            line("Books", dec!(1), dec!(5.00), VatCategory::Reduced),
        ],
        defer_numbering: false,
    }
}

// -----------------------------------------------------------------------------
// Fake authority
// -----------------------------------------------------------------------------

/// Scripted authority. Unscripted submissions succeed with a fresh mark.
#[derive(Default)]
pub struct FakeAuthority {
    send_responses: Mutex<VecDeque<DocumentResult<ResponseDoc>>>,
    cancel_responses: Mutex<VecDeque<DocumentResult<ResponseDoc>>>,
    status_responses: Mutex<VecDeque<DocumentResult<DocStatusResponse>>>,
    pub send_calls: AtomicU32,
    pub cancel_calls: AtomicU32,
    pub ping_calls: AtomicU32,
    next_mark: AtomicU32,
}

impl FakeAuthority {
    pub fn push_send(&self, response: DocumentResult<ResponseDoc>) {
        self.send_responses.lock().unwrap().push_back(response);
    }

    pub fn push_cancel(&self, response: DocumentResult<ResponseDoc>) {
        self.cancel_responses.lock().unwrap().push_back(response);
    }

    pub fn push_status(&self, response: DocumentResult<DocStatusResponse>) {
        self.status_responses.lock().unwrap().push_back(response);
    }

    pub fn sends(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    fn mark(&self) -> String {
        format!("4000000{:05}", self.next_mark.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub fn accepted(mark: &str) -> ResponseDoc {
    ResponseDoc {
        response: vec![ResponseItem {
            index: Some(1),
            invoice_uid: Some(format!("UID-{}", mark)),
            invoice_mark: Some(mark.to_string()),
            cancellation_mark: None,
            status_code: "Success".to_string(),
            errors: None,
        }],
    }
}

pub fn cancelled(cancellation_mark: &str) -> ResponseDoc {
    ResponseDoc {
        response: vec![ResponseItem {
            index: Some(1),
            invoice_uid: None,
            invoice_mark: None,
            cancellation_mark: Some(cancellation_mark.to_string()),
            status_code: "Success".to_string(),
            errors: None,
        }],
    }
}

pub fn rejected(code: &str, message: &str) -> ResponseDoc {
    ResponseDoc {
        response: vec![ResponseItem {
            index: Some(1),
            invoice_uid: None,
            invoice_mark: None,
            cancellation_mark: None,
            status_code: "ValidationError".to_string(),
            errors: Some(ErrorList {
                error: vec![ResponseError {
                    message: message.to_string(),
                    code: code.to_string(),
                }],
            }),
        }],
    }
}

pub fn technical_error(message: &str) -> ResponseDoc {
    ResponseDoc {
        response: vec![ResponseItem {
            index: Some(1),
            invoice_uid: None,
            invoice_mark: None,
            cancellation_mark: None,
            status_code: "TechnicalError".to_string(),
            errors: Some(ErrorList {
                error: vec![ResponseError {
                    message: message.to_string(),
                    code: "500".to_string(),
                }],
            }),
        }],
    }
}

#[async_trait]
impl ComplianceAuthority for FakeAuthority {
    async fn send_invoices(&self, _payload: &InvoicesDoc) -> DocumentResult<ResponseDoc> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.send_responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(accepted(&self.mark())))
    }

    async fn cancel_invoice(&self, _mark: &str) -> DocumentResult<ResponseDoc> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.cancel_responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(cancelled(&self.mark())))
    }

    async fn request_status(&self, mark: &str) -> DocumentResult<DocStatusResponse> {
        let scripted = self.status_responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(DocStatusResponse {
                mark: mark.to_string(),
                status: "submitted".to_string(),
                cancellation_mark: None,
                errors: None,
            })
        })
    }

    async fn ping(&self) -> DocumentResult<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Audit log whose writes always fail.
pub struct FailingAuditLog;

#[async_trait]
impl AuditLog for FailingAuditLog {
    async fn append(&self, _entry: &AuditEntry) -> DocumentResult<()> {
        Err(DocumentError::Persistence(anyhow::anyhow!("audit store offline")))
    }

    async fn query(&self, _query: &AuditQuery) -> DocumentResult<Vec<AuditEntry>> {
        Ok(Vec::new())
    }
}

/// Store whose `fail_on`-th compliance write fails. Everything else goes to
/// the wrapped in-memory store.
pub struct FlakyComplianceStore {
    inner: Arc<MemoryStore>,
    fail_on: u32,
    compliance_writes: AtomicU32,
}

impl FlakyComplianceStore {
    pub fn new(inner: Arc<MemoryStore>, fail_on: u32) -> Self {
        Self {
            inner,
            fail_on,
            compliance_writes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyComplianceStore {
    async fn health_check(&self) -> DocumentResult<()> {
        self.inner.health_check().await
    }

    async fn insert_document(
        &self,
        document: &Document,
        lines: &[LineItem],
        scope: Option<&NumberScope>,
    ) -> DocumentResult<Document> {
        self.inner.insert_document(document, lines, scope).await
    }

    async fn assign_number(
        &self,
        document_id: Uuid,
        expected_version: i64,
        scope: &NumberScope,
    ) -> DocumentResult<Document> {
        self.inner.assign_number(document_id, expected_version, scope).await
    }

    async fn get_document(&self, document_id: Uuid) -> DocumentResult<Option<Document>> {
        self.inner.get_document(document_id).await
    }

    async fn get_lines(&self, document_id: Uuid) -> DocumentResult<Vec<LineItem>> {
        self.inner.get_lines(document_id).await
    }

    async fn list_documents(&self, filter: &ListDocumentsFilter) -> DocumentResult<Vec<Document>> {
        self.inner.list_documents(filter).await
    }

    async fn update_document(
        &self,
        document: &Document,
        expected_version: i64,
    ) -> DocumentResult<Document> {
        self.inner.update_document(document, expected_version).await
    }

    async fn replace_lines(
        &self,
        document: &Document,
        lines: &[LineItem],
        expected_version: i64,
    ) -> DocumentResult<Document> {
        self.inner.replace_lines(document, lines, expected_version).await
    }

    async fn update_compliance(
        &self,
        document_id: Uuid,
        record: &ComplianceRecord,
        expected_version: Option<i64>,
    ) -> DocumentResult<Document> {
        let write = self.compliance_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if write == self.fail_on {
            return Err(DocumentError::Persistence(anyhow::anyhow!(
                "connection reset by peer"
            )));
        }
        self.inner
            .update_compliance(document_id, record, expected_version)
            .await
    }

    async fn find_by_mark(&self, mark: &str) -> DocumentResult<Option<Document>> {
        self.inner.find_by_mark(mark).await
    }
}

// -----------------------------------------------------------------------------
// Wiring
// -----------------------------------------------------------------------------

/// Services wired to an in-memory store and a scripted authority.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub authority: Arc<FakeAuthority>,
    pub audit: AuditRecorder,
    pub documents: DocumentService,
    pub gateway: ComplianceGateway,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_audit_log(store.clone(), store)
    }

    pub fn with_audit_log(store: Arc<MemoryStore>, audit_log: Arc<dyn AuditLog>) -> Self {
        init_tracing();

        let authority = Arc::new(FakeAuthority::default());
        let audit = AuditRecorder::new(audit_log);
        let documents = DocumentService::new(
            store.clone(),
            Arc::new(TextRenderer),
            audit.clone(),
            NumberingGenerator::new(&NumberingConfig {
                max_attempts: 5,
                initial_backoff_ms: 1,
            }),
        );
        let gateway = ComplianceGateway::new(
            store.clone(),
            authority.clone(),
            audit.clone(),
            issuer(),
            Duration::from_secs(300),
        );

        Self {
            store,
            authority,
            audit,
            documents,
            gateway,
        }
    }

    /// A gateway over another store, sharing this context's authority and audit log.
    pub fn gateway_over(&self, store: Arc<dyn DocumentStore>) -> ComplianceGateway {
        ComplianceGateway::new(
            store,
            self.authority.clone(),
            self.audit.clone(),
            issuer(),
            Duration::from_secs(300),
        )
    }
}
