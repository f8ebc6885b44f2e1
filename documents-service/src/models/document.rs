//! Document header model for documents-service.

use super::compliance::ComplianceRecord;
use super::line_item::{LineItem, NewLineItem};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of financial document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    CreditNote,
    DebitNote,
    Receipt,
    Proforma,
    Quote,
    Order,
    DeliveryNote,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::CreditNote => "credit_note",
            DocumentType::DebitNote => "debit_note",
            DocumentType::Receipt => "receipt",
            DocumentType::Proforma => "proforma",
            DocumentType::Quote => "quote",
            DocumentType::Order => "order",
            DocumentType::DeliveryNote => "delivery_note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(DocumentType::Invoice),
            "credit_note" => Some(DocumentType::CreditNote),
            "debit_note" => Some(DocumentType::DebitNote),
            "receipt" => Some(DocumentType::Receipt),
            "proforma" => Some(DocumentType::Proforma),
            "quote" => Some(DocumentType::Quote),
            "order" => Some(DocumentType::Order),
            "delivery_note" => Some(DocumentType::DeliveryNote),
            _ => None,
        }
    }

    /// Authority document type code, for types that are reported.
    pub fn authority_code(&self) -> Option<&'static str> {
        match self {
            DocumentType::Invoice => Some("1.1"),
            DocumentType::DebitNote => Some("1.6"),
            DocumentType::CreditNote => Some("5.1"),
            DocumentType::Receipt => Some("11.1"),
            _ => None,
        }
    }

    /// Whether the counterparty must carry a VAT number when reported.
    pub fn requires_counterparty_vat(&self) -> bool {
        matches!(
            self,
            DocumentType::Invoice | DocumentType::CreditNote | DocumentType::DebitNote
        )
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status.
///
/// `Overdue` is never stored; reads derive it from the due date and balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Sent,
    Viewed,
    Paid,
    Partial,
    Overdue,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Sent => "sent",
            DocumentStatus::Viewed => "viewed",
            DocumentStatus::Paid => "paid",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Overdue => "overdue",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocumentStatus::Draft),
            "pending" => Some(DocumentStatus::Pending),
            "sent" => Some(DocumentStatus::Sent),
            "viewed" => Some(DocumentStatus::Viewed),
            "paid" => Some(DocumentStatus::Paid),
            "partial" => Some(DocumentStatus::Partial),
            "overdue" => Some(DocumentStatus::Overdue),
            "cancelled" => Some(DocumentStatus::Cancelled),
            _ => None,
        }
    }

    /// Paid and cancelled documents accept no further edits or cancellation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Paid | DocumentStatus::Cancelled)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment method, carrying the authority's numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    Cheque,
    OnCredit,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::OnCredit => "on_credit",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "cash" => Some(PaymentMethod::Cash),
            "cheque" => Some(PaymentMethod::Cheque),
            "on_credit" => Some(PaymentMethod::OnCredit),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }

    pub fn authority_code(&self) -> u8 {
        match self {
            PaymentMethod::BankTransfer => 1,
            PaymentMethod::Cash => 3,
            PaymentMethod::Cheque => 4,
            PaymentMethod::OnCredit => 5,
            PaymentMethod::Card => 7,
        }
    }
}

/// The billed party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Counterparty {
    pub counterparty_id: Option<Uuid>,
    pub name: String,
    pub vat_number: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub street: Option<String>,
}

/// Header-level inputs to the totals rollup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct HeaderAdjustments {
    pub discount_amount: Decimal,
    pub withholding_rate: Option<Decimal>,
    pub other_charges: Decimal,
}

/// Rolled-up monetary totals of a document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub vat_amount: Decimal,
    pub withholding_amount: Decimal,
    pub other_charges: Decimal,
    pub total: Decimal,
}

/// Document header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: Uuid,
    pub document_type: DocumentType,
    pub series: String,
    pub sequence_number: Option<i64>,
    pub number: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub counterparty: Counterparty,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_terms: Option<String>,
    pub withholding_rate: Option<Decimal>,
    pub totals: DocumentTotals,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub status: DocumentStatus,
    pub compliance: ComplianceRecord,
    pub notes: Option<String>,
    pub sent_to: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_by: String,
    pub updated_by: String,
    pub locked_by: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub finalized_utc: Option<DateTime<Utc>>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub viewed_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Document {
    pub fn adjustments(&self) -> HeaderAdjustments {
        HeaderAdjustments {
            discount_amount: self.totals.discount_amount,
            withholding_rate: self.withholding_rate,
            other_charges: self.totals.other_charges,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }
}

/// A header together with its lines, ordered by line number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentWithLines {
    pub document: Document,
    pub lines: Vec<LineItem>,
}

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub document_type: DocumentType,
    pub series: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub counterparty: Counterparty,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_terms: Option<String>,
    pub adjustments: HeaderAdjustments,
    pub notes: Option<String>,
    pub lines: Vec<NewLineItem>,
    /// Leave the number unassigned until the document is finalized.
    pub defer_numbering: bool,
}

/// Input for updating an editable header. Issue date and type are fixed.
///
/// `None` keeps a field; for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UpdateDocument {
    pub due_date: Option<Option<NaiveDate>>,
    pub counterparty: Option<Counterparty>,
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_terms: Option<Option<String>>,
    pub discount_amount: Option<Decimal>,
    pub withholding_rate: Option<Option<Decimal>>,
    pub other_charges: Option<Decimal>,
    pub notes: Option<Option<String>>,
    /// Reject the update unless the stored version still matches.
    pub expected_version: Option<i64>,
}

/// Filter parameters for listing documents.
#[derive(Debug, Clone)]
pub struct ListDocumentsFilter {
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    pub series: Option<String>,
    pub counterparty_vat_number: Option<String>,
    pub issue_from: Option<NaiveDate>,
    pub issue_to: Option<NaiveDate>,
    /// Reference date for the derived `overdue` status filter.
    pub overdue_on: Option<NaiveDate>,
    pub include_deleted: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

impl Default for ListDocumentsFilter {
    fn default() -> Self {
        Self {
            document_type: None,
            status: None,
            series: None,
            counterparty_vat_number: None,
            issue_from: None,
            issue_to: None,
            overdue_on: None,
            include_deleted: false,
            page_size: 50,
            page_token: None,
        }
    }
}
