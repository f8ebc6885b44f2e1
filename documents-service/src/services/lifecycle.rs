//! Lifecycle guards.
//!
//! `draft -> pending -> sent -> viewed -> paid | partial`, with `cancelled`
//! reachable from every non-terminal state. `overdue` is derived on read.
//! Each guard inspects a header and either allows the transition or explains
//! why not; callers apply the change and persist it.

use crate::error::{DocumentError, DocumentResult};
use crate::models::{ComplianceStatus, Document, DocumentStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;

pub fn ensure_not_locked_by_other(document: &Document, actor: &str) -> DocumentResult<()> {
    match document.locked_by.as_deref() {
        Some(holder) if holder != actor => Err(DocumentError::Conflict(format!(
            "document is locked by {}",
            holder
        ))),
        _ => Ok(()),
    }
}

/// Header and line edits: draft or pending, no compliance mark, not locked.
pub fn ensure_editable(document: &Document, actor: &str) -> DocumentResult<()> {
    if !matches!(
        document.status,
        DocumentStatus::Draft | DocumentStatus::Pending
    ) {
        return Err(DocumentError::Validation(format!(
            "document in status {} can no longer be edited",
            document.status
        )));
    }
    if let Some(mark) = &document.compliance.mark {
        return Err(DocumentError::Conflict(format!(
            "document is certified with mark {} and cannot be edited",
            mark
        )));
    }
    if document.compliance.status == ComplianceStatus::Pending {
        return Err(DocumentError::Conflict(
            "a compliance submission is in progress".to_string(),
        ));
    }
    ensure_not_locked_by_other(document, actor)
}

pub fn ensure_can_finalize(document: &Document, line_count: usize) -> DocumentResult<()> {
    if document.status != DocumentStatus::Draft {
        return Err(DocumentError::Validation(format!(
            "only draft documents can be finalized, status is {}",
            document.status
        )));
    }
    if line_count == 0 {
        return Err(DocumentError::Validation(
            "a document needs at least one line to be finalized".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_can_send(document: &Document) -> DocumentResult<()> {
    match document.status {
        DocumentStatus::Draft => Err(DocumentError::Validation(
            "draft documents must be finalized before sending".to_string(),
        )),
        DocumentStatus::Pending
        | DocumentStatus::Sent
        | DocumentStatus::Viewed
        | DocumentStatus::Partial => Ok(()),
        other => Err(DocumentError::Validation(format!(
            "documents in status {} cannot be sent",
            other
        ))),
    }
}

/// Sending never moves a document backwards.
pub fn status_after_send(current: DocumentStatus) -> DocumentStatus {
    match current {
        DocumentStatus::Viewed | DocumentStatus::Partial => current,
        _ => DocumentStatus::Sent,
    }
}

pub fn ensure_can_mark_viewed(document: &Document) -> DocumentResult<()> {
    if document.status != DocumentStatus::Sent {
        return Err(DocumentError::Validation(format!(
            "only sent documents can be marked viewed, status is {}",
            document.status
        )));
    }
    Ok(())
}

pub fn ensure_can_record_payment(document: &Document, amount: Decimal) -> DocumentResult<()> {
    match document.status {
        DocumentStatus::Draft => {
            return Err(DocumentError::Validation(
                "draft documents must be finalized before recording payments".to_string(),
            ))
        }
        DocumentStatus::Cancelled => {
            return Err(DocumentError::Validation(
                "payments cannot be recorded against a cancelled document".to_string(),
            ))
        }
        _ => {}
    }
    if amount <= Decimal::ZERO {
        return Err(DocumentError::Validation(format!(
            "payment amount must be greater than zero, got {}",
            amount
        )));
    }
    if amount > document.balance_due {
        return Err(DocumentError::Validation(format!(
            "payment amount {} exceeds balance due {}",
            amount, document.balance_due
        )));
    }
    Ok(())
}

pub fn status_after_payment(balance_due: Decimal) -> DocumentStatus {
    if balance_due.is_zero() {
        DocumentStatus::Paid
    } else {
        DocumentStatus::Partial
    }
}

pub fn ensure_can_cancel(document: &Document) -> DocumentResult<()> {
    if document.status.is_terminal() {
        return Err(DocumentError::Validation(format!(
            "documents in status {} cannot be cancelled",
            document.status
        )));
    }
    match document.compliance.status {
        ComplianceStatus::Submitted | ComplianceStatus::Accepted => {
            Err(DocumentError::Validation(format!(
                "document is {} to the tax authority; call cancel_submission before cancelling",
                document.compliance.status
            )))
        }
        ComplianceStatus::Pending => Err(DocumentError::Conflict(
            "a compliance submission is in progress".to_string(),
        )),
        _ => Ok(()),
    }
}

pub fn ensure_can_delete(document: &Document) -> DocumentResult<()> {
    if document.status != DocumentStatus::Draft {
        return Err(DocumentError::Validation(format!(
            "only draft documents can be deleted, status is {}",
            document.status
        )));
    }
    if document.compliance.mark.is_some() {
        return Err(DocumentError::Validation(
            "certified documents cannot be deleted".to_string(),
        ));
    }
    Ok(())
}

/// Status as reported to readers: unpaid documents past their due date are overdue.
pub fn effective_status(document: &Document, today: NaiveDate) -> DocumentStatus {
    let open = !matches!(
        document.status,
        DocumentStatus::Draft | DocumentStatus::Paid | DocumentStatus::Cancelled
    );
    match document.due_date {
        Some(due) if open && due < today && document.balance_due > Decimal::ZERO => {
            DocumentStatus::Overdue
        }
        _ => document.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComplianceRecord, Counterparty, DocumentTotals, DocumentType, PaymentMethod,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn document(status: DocumentStatus) -> Document {
        let now = Utc::now();
        Document {
            document_id: Uuid::new_v4(),
            document_type: DocumentType::Invoice,
            series: "A".to_string(),
            sequence_number: Some(1),
            number: Some("A-000001".to_string()),
            issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()),
            counterparty: Counterparty {
                name: "Acme".to_string(),
                ..Default::default()
            },
            currency: "EUR".to_string(),
            exchange_rate: Decimal::ONE,
            payment_method: PaymentMethod::BankTransfer,
            payment_terms: None,
            withholding_rate: None,
            totals: DocumentTotals {
                total: dec!(42.85),
                ..Default::default()
            },
            paid_amount: Decimal::ZERO,
            balance_due: dec!(42.85),
            status,
            compliance: ComplianceRecord::default(),
            notes: None,
            sent_to: None,
            cancellation_reason: None,
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
            locked_by: None,
            version: 1,
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
    fn test_editable_only_in_draft_or_pending() {
        assert!(ensure_editable(&document(DocumentStatus::Draft), "alice").is_ok());
        assert!(ensure_editable(&document(DocumentStatus::Pending), "alice").is_ok());
        assert!(matches!(
            ensure_editable(&document(DocumentStatus::Sent), "alice"),
            Err(DocumentError::Validation(_))
        ));
    }

    #[test]
    fn test_marked_document_rejects_edits() {
        let mut doc = document(DocumentStatus::Pending);
        doc.compliance.mark = Some("400001234567".to_string());
        doc.compliance.status = ComplianceStatus::Submitted;
        assert!(matches!(
            ensure_editable(&doc, "alice"),
            Err(DocumentError::Conflict(_))
        ));
    }

    #[test]
    fn test_lock_held_by_other_actor_blocks_edit() {
        let mut doc = document(DocumentStatus::Draft);
        doc.locked_by = Some("bob".to_string());
        assert!(matches!(
            ensure_editable(&doc, "alice"),
            Err(DocumentError::Conflict(_))
        ));
        assert!(ensure_editable(&doc, "bob").is_ok());
    }

    #[test]
    fn test_finalize_requires_lines() {
        let doc = document(DocumentStatus::Draft);
        assert!(ensure_can_finalize(&doc, 0).is_err());
        assert!(ensure_can_finalize(&doc, 1).is_ok());
        assert!(ensure_can_finalize(&document(DocumentStatus::Pending), 1).is_err());
    }

    #[test]
    fn test_send_rejects_drafts() {
        assert!(ensure_can_send(&document(DocumentStatus::Draft)).is_err());
        assert!(ensure_can_send(&document(DocumentStatus::Pending)).is_ok());
        assert!(ensure_can_send(&document(DocumentStatus::Cancelled)).is_err());
        assert_eq!(status_after_send(DocumentStatus::Pending), DocumentStatus::Sent);
        assert_eq!(
            status_after_send(DocumentStatus::Partial),
            DocumentStatus::Partial
        );
    }

    #[test]
    fn test_payment_guards() {
        let doc = document(DocumentStatus::Sent);
        assert!(ensure_can_record_payment(&doc, dec!(0)).is_err());
        assert!(ensure_can_record_payment(&doc, dec!(42.86)).is_err());
        assert!(ensure_can_record_payment(&doc, dec!(42.85)).is_ok());
        assert!(ensure_can_record_payment(&document(DocumentStatus::Cancelled), dec!(1)).is_err());
        assert!(ensure_can_record_payment(&document(DocumentStatus::Draft), dec!(1)).is_err());
        assert_eq!(status_after_payment(dec!(0.00)), DocumentStatus::Paid);
        assert_eq!(status_after_payment(dec!(0.01)), DocumentStatus::Partial);
    }

    #[test]
    fn test_cancel_blocked_while_certified() {
        let mut doc = document(DocumentStatus::Sent);
        doc.compliance.status = ComplianceStatus::Submitted;
        doc.compliance.mark = Some("400001234567".to_string());
        let err = ensure_can_cancel(&doc).unwrap_err();
        assert!(err.to_string().contains("cancel_submission"));

        doc.compliance.status = ComplianceStatus::Cancelled;
        assert!(ensure_can_cancel(&doc).is_ok());
        assert!(ensure_can_cancel(&document(DocumentStatus::Paid)).is_err());
    }

    #[test]
    fn test_delete_only_drafts() {
        assert!(ensure_can_delete(&document(DocumentStatus::Draft)).is_ok());
        assert!(ensure_can_delete(&document(DocumentStatus::Pending)).is_err());
    }

    #[test]
    fn test_overdue_is_derived() {
        let doc = document(DocumentStatus::Sent);
        let before_due = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let after_due = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert_eq!(effective_status(&doc, before_due), DocumentStatus::Sent);
        assert_eq!(effective_status(&doc, after_due), DocumentStatus::Overdue);

        let mut paid = document(DocumentStatus::Paid);
        paid.balance_due = Decimal::ZERO;
        assert_eq!(effective_status(&paid, after_due), DocumentStatus::Paid);
        assert_eq!(
            effective_status(&document(DocumentStatus::Draft), after_due),
            DocumentStatus::Draft
        );
    }
}
