//! Document aggregate service.
//!
//! Every mutation loads the header, checks the lifecycle guard, applies the
//! change, recomputes totals from the full line set and persists with a
//! version check. Audit entries are written after the store commits.

use crate::error::{DocumentError, DocumentResult};
use crate::models::{
    Counterparty, CreateDocument, Document, DocumentStatus, DocumentWithLines, LineItem,
    ListDocumentsFilter, NewLineItem, UpdateDocument, UpdateLineItem,
};
use crate::services::audit::{snapshot, AuditRecorder};
use crate::services::calculator::{balance_due, compute_line, compute_totals, round_money};
use crate::services::lifecycle;
use crate::services::metrics::{DOCUMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL};
use crate::services::numbering::{normalize_series, NumberScope, NumberingGenerator};
use crate::services::renderer::DocumentRenderer;
use crate::services::store::DocumentStore;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const ENTITY: &str = "document";

/// Result of sending a document: the updated header and the rendered payload.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub document: Document,
    pub rendered: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    renderer: Arc<dyn DocumentRenderer>,
    audit: AuditRecorder,
    numbering: NumberingGenerator,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        renderer: Arc<dyn DocumentRenderer>,
        audit: AuditRecorder,
        numbering: NumberingGenerator,
    ) -> Self {
        Self {
            store,
            renderer,
            audit,
            numbering,
        }
    }

    // -------------------------------------------------------------------------
    // Creation and reads
    // -------------------------------------------------------------------------

    /// Create a draft document with its lines, numbering it unless deferred.
    #[instrument(skip(self, input), fields(document_type = %input.document_type, actor = %actor))]
    pub async fn create(
        &self,
        input: CreateDocument,
        actor: &str,
    ) -> DocumentResult<DocumentWithLines> {
        validate_actor(actor)?;
        let series = normalize_series(input.series.as_deref())?;
        validate_counterparty(&input.counterparty)?;
        let currency = normalize_currency(&input.currency)?;
        validate_exchange_rate(input.exchange_rate)?;
        if let Some(due) = input.due_date {
            if due < input.issue_date {
                return Err(DocumentError::Validation(
                    "due date must not precede the issue date".to_string(),
                ));
            }
        }

        let document_id = Uuid::new_v4();
        let lines = input
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| build_line(document_id, i as i32 + 1, line))
            .collect::<DocumentResult<Vec<_>>>()?;
        let totals = compute_totals(&lines, &input.adjustments)?;

        let now = Utc::now();
        let document = Document {
            document_id,
            document_type: input.document_type,
            series,
            sequence_number: None,
            number: None,
            issue_date: input.issue_date,
            due_date: input.due_date,
            counterparty: input.counterparty,
            currency,
            exchange_rate: input.exchange_rate,
            payment_method: input.payment_method,
            payment_terms: input.payment_terms,
            withholding_rate: input.adjustments.withholding_rate,
            totals,
            paid_amount: round_money(Decimal::ZERO),
            balance_due: balance_due(totals.total, Decimal::ZERO),
            status: DocumentStatus::Draft,
            compliance: Default::default(),
            notes: input.notes,
            sent_to: None,
            cancellation_reason: None,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
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
        };

        let stored = if input.defer_numbering {
            self.store.insert_document(&document, &lines, None).await?
        } else {
            let scope = NumberScope::new(
                document.document_type,
                &document.series,
                document.issue_date,
            );
            self.numbering
                .allocate(&scope, || {
                    self.store.insert_document(&document, &lines, Some(&scope))
                })
                .await?
        };

        DOCUMENTS_TOTAL
            .with_label_values(&[stored.document_type.as_str(), "create"])
            .inc();
        info!(
            document_id = %stored.document_id,
            number = stored.number.as_deref().unwrap_or(""),
            total = %stored.totals.total,
            "Document created"
        );
        self.audit
            .record(ENTITY, stored.document_id, actor, "create", None, snapshot(&stored))
            .await;

        Ok(DocumentWithLines {
            document: present(stored),
            lines,
        })
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn get(&self, document_id: Uuid) -> DocumentResult<Document> {
        self.load(document_id).await.map(present)
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn get_with_lines(&self, document_id: Uuid) -> DocumentResult<DocumentWithLines> {
        let document = self.load(document_id).await?;
        let lines = self.store.get_lines(document_id).await?;
        Ok(DocumentWithLines {
            document: present(document),
            lines,
        })
    }

    #[instrument(skip(self, filter))]
    pub async fn list(&self, filter: &ListDocumentsFilter) -> DocumentResult<Vec<Document>> {
        let documents = self.store.list_documents(filter).await?;
        Ok(documents.into_iter().map(present).collect())
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    #[instrument(skip(self, changes), fields(document_id = %document_id, actor = %actor))]
    pub async fn update_header(
        &self,
        document_id: Uuid,
        changes: UpdateDocument,
        actor: &str,
    ) -> DocumentResult<Document> {
        let current = self.load(document_id).await?;
        check_expected_version(&current, changes.expected_version)?;
        lifecycle::ensure_editable(&current, actor)?;

        let mut updated = current.clone();
        if let Some(due_date) = changes.due_date {
            if due_date.is_some_and(|due| due < updated.issue_date) {
                return Err(DocumentError::Validation(
                    "due date must not precede the issue date".to_string(),
                ));
            }
            updated.due_date = due_date;
        }
        if let Some(counterparty) = changes.counterparty {
            validate_counterparty(&counterparty)?;
            updated.counterparty = counterparty;
        }
        if let Some(currency) = changes.currency {
            updated.currency = normalize_currency(&currency)?;
        }
        if let Some(rate) = changes.exchange_rate {
            validate_exchange_rate(rate)?;
            updated.exchange_rate = rate;
        }
        if let Some(method) = changes.payment_method {
            updated.payment_method = method;
        }
        if let Some(terms) = changes.payment_terms {
            updated.payment_terms = terms;
        }
        if let Some(notes) = changes.notes {
            updated.notes = notes;
        }
        if let Some(discount) = changes.discount_amount {
            updated.totals.discount_amount = discount;
        }
        if let Some(other) = changes.other_charges {
            updated.totals.other_charges = other;
        }
        if let Some(rate) = changes.withholding_rate {
            updated.withholding_rate = rate;
        }

        let lines = self.store.get_lines(document_id).await?;
        recompute(&mut updated, &lines)?;
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "update_header")
            .await;
        Ok(present(saved))
    }

    #[instrument(skip(self, line), fields(document_id = %document_id, actor = %actor))]
    pub async fn add_line(
        &self,
        document_id: Uuid,
        line: NewLineItem,
        actor: &str,
    ) -> DocumentResult<DocumentWithLines> {
        self.apply_line_change(document_id, actor, "add_line", None, |document, lines| {
            let next = lines.iter().map(|l| l.line_number).max().unwrap_or(0) + 1;
            lines.push(build_line(document.document_id, next, &line)?);
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, changes), fields(document_id = %document_id, actor = %actor))]
    pub async fn update_line(
        &self,
        document_id: Uuid,
        line_number: i32,
        changes: UpdateLineItem,
        actor: &str,
    ) -> DocumentResult<DocumentWithLines> {
        let expected_version = changes.expected_version;
        self.apply_line_change(
            document_id,
            actor,
            "update_line",
            expected_version,
            |document, lines| {
                let line = lines
                    .iter_mut()
                    .find(|l| l.line_number == line_number)
                    .ok_or_else(|| {
                        DocumentError::not_found(
                            "line",
                            format!("{}#{}", document.document_id, line_number),
                        )
                    })?;

                let input = NewLineItem {
                    description: changes.description.unwrap_or_else(|| line.description.clone()),
                    quantity: changes.quantity.unwrap_or(line.quantity),
                    unit: changes.unit.unwrap_or_else(|| line.unit.clone()),
                    unit_price: changes.unit_price.unwrap_or(line.unit_price),
                    discount: changes.discount.unwrap_or(line.discount),
                    vat_category: changes.vat_category.unwrap_or(line.vat_category),
                    income_classification: changes
                        .income_classification
                        .or_else(|| line.income_classification.clone()),
                };
                let rebuilt = build_line(document.document_id, line_number, &input)?;
                *line = LineItem {
                    line_id: line.line_id,
                    ..rebuilt
                };
                Ok(())
            },
        )
        .await
    }

    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn remove_line(
        &self,
        document_id: Uuid,
        line_number: i32,
        actor: &str,
    ) -> DocumentResult<DocumentWithLines> {
        self.apply_line_change(document_id, actor, "remove_line", None, |document, lines| {
            let index = lines
                .iter()
                .position(|l| l.line_number == line_number)
                .ok_or_else(|| {
                    DocumentError::not_found(
                        "line",
                        format!("{}#{}", document.document_id, line_number),
                    )
                })?;
            if lines.len() == 1 && document.status != DocumentStatus::Draft {
                return Err(DocumentError::Validation(
                    "a finalized document must keep at least one line".to_string(),
                ));
            }
            lines.remove(index);
            Ok(())
        })
        .await
    }

    /// Soft-delete a draft.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn delete(&self, document_id: Uuid, actor: &str) -> DocumentResult<()> {
        let current = self.load(document_id).await?;
        lifecycle::ensure_not_locked_by_other(&current, actor)?;
        lifecycle::ensure_can_delete(&current)?;

        let mut updated = current.clone();
        updated.deleted_utc = Some(Utc::now());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "delete").await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle transitions
    // -------------------------------------------------------------------------

    /// `draft -> pending`, assigning a number if the document has none.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn finalize(&self, document_id: Uuid, actor: &str) -> DocumentResult<Document> {
        let current = self.load(document_id).await?;
        lifecycle::ensure_not_locked_by_other(&current, actor)?;
        let lines = self.store.get_lines(document_id).await?;
        lifecycle::ensure_can_finalize(&current, lines.len())?;

        let numbered = if current.sequence_number.is_none() {
            let scope = NumberScope::new(current.document_type, &current.series, current.issue_date);
            self.numbering
                .allocate(&scope, || {
                    self.store
                        .assign_number(document_id, current.version, &scope)
                })
                .await?
        } else {
            current.clone()
        };

        let mut updated = numbered.clone();
        updated.status = DocumentStatus::Pending;
        updated.finalized_utc = Some(Utc::now());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, numbered.version).await?;
        self.after_mutation(&current, &saved, actor, "finalize").await;
        Ok(present(saved))
    }

    /// Render the document and record that it was sent to `target`.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn send(
        &self,
        document_id: Uuid,
        target: &str,
        actor: &str,
    ) -> DocumentResult<SendOutcome> {
        let target = target.trim();
        if target.is_empty() {
            return Err(DocumentError::Validation(
                "a send target is required".to_string(),
            ));
        }
        let current = self.load(document_id).await?;
        lifecycle::ensure_can_send(&current)?;

        let lines = self.store.get_lines(document_id).await?;
        let rendered = self.renderer.render(&current, &lines)?;

        let mut updated = current.clone();
        updated.status = lifecycle::status_after_send(current.status);
        updated.sent_utc = Some(Utc::now());
        updated.sent_to = Some(target.to_string());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "send").await;
        Ok(SendOutcome {
            document: present(saved),
            rendered,
            content_type: self.renderer.content_type(),
        })
    }

    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn mark_viewed(&self, document_id: Uuid, actor: &str) -> DocumentResult<Document> {
        let current = self.load(document_id).await?;
        lifecycle::ensure_can_mark_viewed(&current)?;

        let mut updated = current.clone();
        updated.status = DocumentStatus::Viewed;
        updated.viewed_utc = Some(Utc::now());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "mark_viewed")
            .await;
        Ok(present(saved))
    }

    /// Record a payment; the document becomes `paid` once the balance reaches zero.
    #[instrument(skip(self), fields(document_id = %document_id, amount = %amount, actor = %actor))]
    pub async fn record_payment(
        &self,
        document_id: Uuid,
        amount: Decimal,
        actor: &str,
    ) -> DocumentResult<Document> {
        if round_money(amount) != amount {
            return Err(DocumentError::Validation(format!(
                "payment amount {} has more than two decimal places",
                amount
            )));
        }
        let current = self.load(document_id).await?;
        lifecycle::ensure_can_record_payment(&current, amount)?;

        let mut updated = current.clone();
        updated.paid_amount = round_money(current.paid_amount + amount);
        updated.balance_due = balance_due(updated.totals.total, updated.paid_amount);
        updated.status = lifecycle::status_after_payment(updated.balance_due);
        if updated.status == DocumentStatus::Paid {
            updated.paid_utc = Some(Utc::now());
        }
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[saved.currency.as_str()])
            .inc_by(amount.to_f64().unwrap_or_default());
        self.after_mutation(&current, &saved, actor, "record_payment")
            .await;
        Ok(present(saved))
    }

    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn cancel(
        &self,
        document_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> DocumentResult<Document> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DocumentError::Validation(
                "a cancellation reason is required".to_string(),
            ));
        }
        let current = self.load(document_id).await?;
        lifecycle::ensure_not_locked_by_other(&current, actor)?;
        lifecycle::ensure_can_cancel(&current)?;

        let mut updated = current.clone();
        updated.status = DocumentStatus::Cancelled;
        updated.cancellation_reason = Some(reason.to_string());
        updated.cancelled_utc = Some(Utc::now());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "cancel").await;
        Ok(present(saved))
    }

    /// Take the edit lock. Re-locking by the holder is a no-op.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn lock(&self, document_id: Uuid, actor: &str) -> DocumentResult<Document> {
        validate_actor(actor)?;
        let current = self.load(document_id).await?;
        lifecycle::ensure_not_locked_by_other(&current, actor)?;
        if current.locked_by.as_deref() == Some(actor) {
            return Ok(present(current));
        }

        let mut updated = current.clone();
        updated.locked_by = Some(actor.to_string());
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "lock").await;
        Ok(present(saved))
    }

    /// Release the edit lock held by `actor`.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn unlock(&self, document_id: Uuid, actor: &str) -> DocumentResult<Document> {
        let current = self.load(document_id).await?;
        lifecycle::ensure_not_locked_by_other(&current, actor)?;
        if current.locked_by.is_none() {
            return Ok(present(current));
        }

        let mut updated = current.clone();
        updated.locked_by = None;
        updated.updated_by = actor.to_string();

        let saved = self.store.update_document(&updated, current.version).await?;
        self.after_mutation(&current, &saved, actor, "unlock").await;
        Ok(present(saved))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load(&self, document_id: Uuid) -> DocumentResult<Document> {
        match self.store.get_document(document_id).await? {
            Some(document) if !document.is_deleted() => Ok(document),
            _ => Err(DocumentError::not_found(ENTITY, document_id)),
        }
    }

    /// Apply a line change, then recompute and persist header and lines together.
    async fn apply_line_change<F>(
        &self,
        document_id: Uuid,
        actor: &str,
        action: &str,
        expected_version: Option<i64>,
        change: F,
    ) -> DocumentResult<DocumentWithLines>
    where
        F: FnOnce(&Document, &mut Vec<LineItem>) -> DocumentResult<()>,
    {
        let current = self.load(document_id).await?;
        check_expected_version(&current, expected_version)?;
        lifecycle::ensure_editable(&current, actor)?;

        let mut lines = self.store.get_lines(document_id).await?;
        change(&current, &mut lines)?;

        let mut updated = current.clone();
        recompute(&mut updated, &lines)?;
        updated.updated_by = actor.to_string();

        let saved = self
            .store
            .replace_lines(&updated, &lines, current.version)
            .await?;
        self.after_mutation(&current, &saved, actor, action).await;
        Ok(DocumentWithLines {
            document: present(saved),
            lines,
        })
    }

    async fn after_mutation(&self, before: &Document, after: &Document, actor: &str, action: &str) {
        DOCUMENTS_TOTAL
            .with_label_values(&[after.document_type.as_str(), action])
            .inc();
        info!(
            document_id = %after.document_id,
            status = %after.status,
            version = after.version,
            action,
            "Document updated"
        );
        self.audit
            .record(
                ENTITY,
                after.document_id,
                actor,
                action,
                snapshot(before),
                snapshot(after),
            )
            .await;
    }
}

/// Report the derived `overdue` status to readers.
fn present(mut document: Document) -> Document {
    document.status = lifecycle::effective_status(&document, Utc::now().date_naive());
    document
}

fn recompute(document: &mut Document, lines: &[LineItem]) -> DocumentResult<()> {
    let totals = compute_totals(lines, &document.adjustments())?;
    if totals.total < document.paid_amount {
        return Err(DocumentError::Validation(format!(
            "total {} would fall below the amount already paid {}",
            totals.total, document.paid_amount
        )));
    }
    document.totals = totals;
    document.balance_due = balance_due(totals.total, document.paid_amount);
    Ok(())
}

fn build_line(document_id: Uuid, line_number: i32, input: &NewLineItem) -> DocumentResult<LineItem> {
    let description = input.description.trim();
    if description.is_empty() {
        return Err(DocumentError::Validation(format!(
            "line {}: description is required",
            line_number
        )));
    }
    let unit = input.unit.trim();
    if unit.is_empty() {
        return Err(DocumentError::Validation(format!(
            "line {}: unit is required",
            line_number
        )));
    }

    let amounts = compute_line(
        input.quantity,
        input.unit_price,
        &input.discount,
        input.vat_category,
    )
    .map_err(|e| match e {
        DocumentError::Validation(msg) => {
            DocumentError::Validation(format!("line {}: {}", line_number, msg))
        }
        other => other,
    })?;

    Ok(LineItem {
        line_id: Uuid::new_v4(),
        document_id,
        line_number,
        description: description.to_string(),
        quantity: input.quantity,
        unit: unit.to_string(),
        unit_price: input.unit_price,
        discount: input.discount,
        discount_amount: amounts.discount_amount,
        vat_category: input.vat_category,
        vat_rate: amounts.vat_rate,
        net_amount: amounts.net_amount,
        vat_amount: amounts.vat_amount,
        total_amount: amounts.total_amount,
        income_classification: input
            .income_classification
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    })
}

fn check_expected_version(document: &Document, expected: Option<i64>) -> DocumentResult<()> {
    match expected {
        Some(version) if version != document.version => Err(DocumentError::Conflict(format!(
            "document {} is at version {}, expected {}",
            document.document_id, document.version, version
        ))),
        _ => Ok(()),
    }
}

fn validate_actor(actor: &str) -> DocumentResult<()> {
    if actor.trim().is_empty() {
        return Err(DocumentError::Validation("actor is required".to_string()));
    }
    Ok(())
}

fn validate_counterparty(counterparty: &Counterparty) -> DocumentResult<()> {
    if counterparty.name.trim().is_empty() {
        return Err(DocumentError::Validation(
            "counterparty name is required".to_string(),
        ));
    }
    if let Some(vat) = &counterparty.vat_number {
        if vat.trim().is_empty() || !vat.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DocumentError::Validation(format!(
                "counterparty VAT number '{}' is malformed",
                vat
            )));
        }
    }
    Ok(())
}

fn normalize_currency(currency: &str) -> DocumentResult<String> {
    let code = currency.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DocumentError::Validation(format!(
            "currency '{}' must be a three-letter ISO code",
            currency
        )));
    }
    Ok(code)
}

fn validate_exchange_rate(rate: Decimal) -> DocumentResult<()> {
    if rate <= Decimal::ZERO {
        return Err(DocumentError::Validation(format!(
            "exchange rate must be positive, got {}",
            rate
        )));
    }
    Ok(())
}
