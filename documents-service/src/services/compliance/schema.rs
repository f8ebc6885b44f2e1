//! Authority wire format.
//!
//! Request and response bodies are XML, (de)serialized with quick-xml's serde
//! support. Amounts travel as decimal strings so cents survive the round trip.

use crate::config::IssuerConfig;
use crate::error::{DocumentError, DocumentResult};
use crate::models::{AuthorityError, Document, LineItem};
use chrono::NaiveDate;
use quick_xml::de::DeError;
use quick_xml::se::SeError;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const INVOICE_NAMESPACE: &str = "http://www.aade.gr/myDATA/invoice/v1.0";

pub const DEFAULT_CLASSIFICATION_TYPE: &str = "E3_561_001";
pub const DEFAULT_CLASSIFICATION_CATEGORY: &str = "category1_1";

/// Status code the authority uses for an accepted submission.
const STATUS_SUCCESS: &str = "Success";
/// Status code for a fault on the authority side rather than in the document.
const STATUS_TECHNICAL_ERROR: &str = "TechnicalError";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to serialize authority payload: {0}")]
    Serialize(#[from] SeError),

    #[error("failed to parse authority response: {0}")]
    Deserialize(#[from] DeError),
}

impl From<XmlError> for DocumentError {
    fn from(err: XmlError) -> Self {
        DocumentError::ExternalService(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Request
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicesDoc {
    #[serde(rename = "@xmlns", default)]
    pub xmlns: String,
    #[serde(default)]
    pub invoice: Vec<AuthorityInvoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityInvoice {
    pub issuer: PartyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<PartyType>,
    pub invoice_header: InvoiceHeader,
    pub payment_methods: PaymentMethods,
    #[serde(default)]
    pub invoice_details: Vec<InvoiceRow>,
    pub invoice_summary: InvoiceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyType {
    pub vat_number: String,
    pub country: String,
    pub branch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHeader {
    pub series: String,
    /// Sequence number within the series.
    pub aa: String,
    pub issue_date: NaiveDate,
    pub invoice_type: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub exchange_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethods {
    #[serde(default)]
    pub payment_method_details: Vec<PaymentMethodDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodDetail {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRow {
    pub line_number: i32,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_value: Decimal,
    pub vat_category: u8,
    #[serde(with = "rust_decimal::serde::str")]
    pub vat_amount: Decimal,
    #[serde(default)]
    pub income_classification: Vec<IncomeClassification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeClassification {
    pub classification_type: String,
    pub classification_category: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    #[serde(with = "rust_decimal::serde::str")]
    pub total_net_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_vat_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_withheld_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_fees_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_deductions_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_gross_value: Decimal,
    #[serde(default)]
    pub income_classification: Vec<IncomeClassification>,
}

// -----------------------------------------------------------------------------
// Responses
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseDoc {
    #[serde(default)]
    pub response: Vec<ResponseItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_mark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_mark: Option<String>,
    pub status_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorList {
    #[serde(default)]
    pub error: Vec<ResponseError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    pub code: String,
}

/// Reply to a status poll for a single mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocStatusResponse {
    pub mark: String,
    /// `submitted`, `accepted`, `rejected` or `cancelled`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_mark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorList>,
}

/// What a response item means for the submitted document.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Accepted {
        mark: String,
        uid: Option<String>,
        cancellation_mark: Option<String>,
    },
    Rejected {
        status_code: String,
        errors: Vec<AuthorityError>,
    },
}

impl ResponseItem {
    /// Interpret the item. A technical error at the authority is a failed
    /// call, not a verdict on the document.
    pub fn outcome(&self) -> DocumentResult<ResponseOutcome> {
        if self.status_code == STATUS_TECHNICAL_ERROR {
            let details = authority_errors(self.errors.as_ref())
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DocumentError::ExternalService(format!(
                "authority reported a technical error ({})",
                details
            )));
        }

        let accepted = self.status_code == STATUS_SUCCESS;
        let mark = self
            .invoice_mark
            .clone()
            .or_else(|| self.cancellation_mark.clone());
        Ok(match mark {
            Some(mark) if accepted => ResponseOutcome::Accepted {
                mark,
                uid: self.invoice_uid.clone(),
                cancellation_mark: self.cancellation_mark.clone(),
            },
            _ => ResponseOutcome::Rejected {
                status_code: self.status_code.clone(),
                errors: authority_errors(self.errors.as_ref()),
            },
        })
    }
}

pub fn authority_errors(errors: Option<&ErrorList>) -> Vec<AuthorityError> {
    errors
        .map(|list| {
            list.error
                .iter()
                .map(|e| AuthorityError {
                    code: e.code.clone(),
                    message: e.message.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

// -----------------------------------------------------------------------------
// Mapping
// -----------------------------------------------------------------------------

/// Map a numbered document and its lines to the authority payload.
pub fn build_invoice(
    document: &Document,
    lines: &[LineItem],
    issuer: &IssuerConfig,
) -> DocumentResult<AuthorityInvoice> {
    let invoice_type = document.document_type.authority_code().ok_or_else(|| {
        DocumentError::Validation(format!(
            "{} documents are not reported to the tax authority",
            document.document_type
        ))
    })?;
    let aa = document.sequence_number.ok_or_else(|| {
        DocumentError::Validation("document must be numbered before submission".to_string())
    })?;
    if lines.is_empty() {
        return Err(DocumentError::Validation(
            "document must have at least one line to be submitted".to_string(),
        ));
    }

    let counterparty = &document.counterparty;
    let counterpart = match &counterparty.vat_number {
        Some(vat_number) => Some(PartyType {
            vat_number: vat_number.clone(),
            country: counterparty
                .country
                .clone()
                .unwrap_or_else(|| issuer.country.clone()),
            branch: 0,
            name: Some(counterparty.name.clone()),
            address: address_of(document),
        }),
        None if document.document_type.requires_counterparty_vat() => {
            return Err(DocumentError::Validation(format!(
                "counterparty VAT number is required for {} documents",
                document.document_type
            )));
        }
        None => None,
    };

    let mut classification_totals: BTreeMap<String, Decimal> = BTreeMap::new();
    let invoice_details = lines
        .iter()
        .map(|line| {
            let category = line
                .income_classification
                .clone()
                .unwrap_or_else(|| DEFAULT_CLASSIFICATION_CATEGORY.to_string());
            *classification_totals.entry(category.clone()).or_default() += line.net_amount;
            InvoiceRow {
                line_number: line.line_number,
                net_value: line.net_amount,
                vat_category: line.vat_category.authority_code(),
                vat_amount: line.vat_amount,
                income_classification: vec![IncomeClassification {
                    classification_type: DEFAULT_CLASSIFICATION_TYPE.to_string(),
                    classification_category: category,
                    amount: line.net_amount,
                }],
            }
        })
        .collect();

    let totals = &document.totals;
    Ok(AuthorityInvoice {
        issuer: PartyType {
            vat_number: issuer.vat_number.clone(),
            country: issuer.country.clone(),
            branch: issuer.branch,
            name: None,
            address: None,
        },
        counterpart,
        invoice_header: InvoiceHeader {
            series: document.series.clone(),
            aa: aa.to_string(),
            issue_date: document.issue_date,
            invoice_type: invoice_type.to_string(),
            currency: document.currency.clone(),
            exchange_rate: document.exchange_rate,
        },
        payment_methods: PaymentMethods {
            payment_method_details: vec![PaymentMethodDetail {
                kind: document.payment_method.authority_code(),
                amount: totals.total,
            }],
        },
        invoice_details,
        invoice_summary: InvoiceSummary {
            total_net_value: totals.subtotal,
            total_vat_amount: totals.vat_amount,
            total_withheld_amount: totals.withholding_amount,
            total_fees_amount: totals.other_charges,
            total_deductions_amount: totals.discount_amount,
            total_gross_value: totals.total,
            income_classification: classification_totals
                .into_iter()
                .map(|(category, amount)| IncomeClassification {
                    classification_type: DEFAULT_CLASSIFICATION_TYPE.to_string(),
                    classification_category: category,
                    amount,
                })
                .collect(),
        },
    })
}

fn address_of(document: &Document) -> Option<AddressType> {
    let c = &document.counterparty;
    if c.street.is_none() && c.postal_code.is_none() && c.city.is_none() {
        return None;
    }
    Some(AddressType {
        street: c.street.clone(),
        postal_code: c.postal_code.clone(),
        city: c.city.clone(),
    })
}

impl InvoicesDoc {
    pub fn new(invoice: Vec<AuthorityInvoice>) -> Self {
        Self {
            xmlns: INVOICE_NAMESPACE.to_string(),
            invoice,
        }
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        Ok(quick_xml::se::to_string_with_root("InvoicesDoc", self)?)
    }
}

pub fn from_xml<T: DeserializeOwned>(xml: &str) -> Result<T, XmlError> {
    Ok(quick_xml::de::from_str(xml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComplianceRecord, Counterparty, DocumentStatus, DocumentTotals, DocumentType,
        LineDiscount, PaymentMethod, VatCategory,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn issuer() -> IssuerConfig {
        IssuerConfig {
            vat_number: "123456789".to_string(),
            country: "GR".to_string(),
            branch: 0,
            name: None,
        }
    }

    fn line(number: i32, net: Decimal, vat: Decimal, classification: Option<&str>) -> LineItem {
        LineItem {
            line_id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            line_number: number,
            description: "Consulting".to_string(),
            quantity: dec!(1),
            unit: "h".to_string(),
            unit_price: net,
            discount: LineDiscount::None,
            discount_amount: dec!(0.00),
            vat_category: VatCategory::Normal,
            vat_rate: dec!(24),
            net_amount: net,
            vat_amount: vat,
            total_amount: net + vat,
            income_classification: classification.map(str::to_string),
        }
    }

    fn document(document_type: DocumentType, vat_number: Option<&str>) -> Document {
        let now = Utc::now();
        Document {
            document_id: Uuid::new_v4(),
            document_type,
            series: "A".to_string(),
            sequence_number: Some(7),
            number: Some("A-000007".to_string()),
            issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: None,
            counterparty: Counterparty {
                name: "Acme".to_string(),
                vat_number: vat_number.map(str::to_string),
                city: Some("Athens".to_string()),
                ..Default::default()
            },
            currency: "EUR".to_string(),
            exchange_rate: dec!(1),
            payment_method: PaymentMethod::BankTransfer,
            payment_terms: None,
            withholding_rate: None,
            totals: DocumentTotals {
                subtotal: dec!(35.00),
                discount_amount: dec!(0.00),
                vat_amount: dec!(8.40),
                withholding_amount: dec!(0.00),
                other_charges: dec!(0.00),
                total: dec!(43.40),
            },
            paid_amount: dec!(0.00),
            balance_due: dec!(43.40),
            status: DocumentStatus::Pending,
            compliance: ComplianceRecord::default(),
            notes: None,
            sent_to: None,
            cancellation_reason: None,
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
            locked_by: None,
            version: 3,
            created_utc: now,
            updated_utc: now,
            finalized_utc: None,
            sent_utc: None,
            viewed_utc: None,
            paid_utc: None,
            cancelled_utc: None,
            deleted_utc: None,
        }
    }

    #[test]
    fn test_build_invoice_maps_codes_and_totals() {
        let lines = vec![
            line(1, dec!(20.00), dec!(4.80), None),
            line(2, dec!(15.00), dec!(3.60), Some("category1_3")),
        ];
        let invoice =
            build_invoice(&document(DocumentType::Invoice, Some("987654321")), &lines, &issuer())
                .unwrap();

        assert_eq!(invoice.invoice_header.invoice_type, "1.1");
        assert_eq!(invoice.invoice_header.aa, "7");
        assert_eq!(invoice.payment_methods.payment_method_details[0].kind, 1);
        assert_eq!(invoice.invoice_details[0].vat_category, 1);
        assert_eq!(invoice.invoice_summary.total_gross_value, dec!(43.40));
        assert_eq!(invoice.invoice_summary.income_classification.len(), 2);
        assert_eq!(
            invoice.counterpart.as_ref().map(|c| c.country.as_str()),
            Some("GR")
        );
    }

    #[test]
    fn test_build_invoice_rejects_unreportable_types() {
        let lines = vec![line(1, dec!(10.00), dec!(2.40), None)];
        let err = build_invoice(&document(DocumentType::Quote, None), &lines, &issuer())
            .unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }

    #[test]
    fn test_invoice_requires_counterparty_vat() {
        let lines = vec![line(1, dec!(10.00), dec!(2.40), None)];
        assert!(build_invoice(&document(DocumentType::Invoice, None), &lines, &issuer()).is_err());
        assert!(build_invoice(&document(DocumentType::Receipt, None), &lines, &issuer()).is_ok());
    }

    #[test]
    fn test_round_trip_keeps_cents() {
        let lines = vec![
            line(1, dec!(20.10), dec!(4.82), None),
            line(2, dec!(14.90), dec!(3.58), None),
        ];
        let mut doc = document(DocumentType::Invoice, Some("987654321"));
        doc.totals.subtotal = dec!(35.00);
        doc.totals.vat_amount = dec!(8.40);
        doc.totals.total = dec!(43.40);
        let payload = InvoicesDoc::new(vec![
            build_invoice(&doc, &lines, &issuer()).unwrap()
        ]);

        let xml = payload.to_xml().unwrap();
        assert!(xml.contains("<totalNetValue>35.00</totalNetValue>"));

        let parsed: InvoicesDoc = from_xml(&xml).unwrap();
        let invoice = &parsed.invoice[0];
        assert_eq!(invoice.invoice_summary.total_net_value, dec!(35.00));
        assert_eq!(invoice.invoice_summary.total_net_value.to_string(), "35.00");
        assert_eq!(invoice.invoice_details[0].vat_amount, dec!(4.82));
        assert_eq!(invoice.invoice_header, payload.invoice[0].invoice_header);
    }

    #[test]
    fn test_response_outcomes() {
        let xml = r#"<ResponseDoc>
            <response>
                <index>1</index>
                <invoiceUid>ABC123</invoiceUid>
                <invoiceMark>400001234567</invoiceMark>
                <statusCode>Success</statusCode>
            </response>
            <response>
                <index>2</index>
                <statusCode>ValidationError</statusCode>
                <errors>
                    <error><message>Invalid VAT number</message><code>104</code></error>
                </errors>
            </response>
        </ResponseDoc>"#;
        let doc: ResponseDoc = from_xml(xml).unwrap();

        assert_eq!(
            doc.response[0].outcome().unwrap(),
            ResponseOutcome::Accepted {
                mark: "400001234567".to_string(),
                uid: Some("ABC123".to_string()),
                cancellation_mark: None,
            }
        );
        match doc.response[1].outcome().unwrap() {
            ResponseOutcome::Rejected { status_code, errors } => {
                assert_eq!(status_code, "ValidationError");
                assert_eq!(errors[0].code, "104");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_technical_error_is_not_a_rejection() {
        let xml = r#"<ResponseDoc>
            <response>
                <index>1</index>
                <statusCode>TechnicalError</statusCode>
                <errors>
                    <error><message>Service temporarily unavailable</message><code>500</code></error>
                </errors>
            </response>
        </ResponseDoc>"#;
        let doc: ResponseDoc = from_xml(xml).unwrap();

        match doc.response[0].outcome() {
            Err(DocumentError::ExternalService(msg)) => {
                assert!(msg.contains("Service temporarily unavailable"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
