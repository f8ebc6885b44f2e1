//! PostgreSQL store for documents-service.

use crate::error::{DocumentError, DocumentResult};
use crate::models::{
    AuditEntry, AuditOutcome, AuditQuery, AuthorityError, ComplianceRecord, ComplianceStatus,
    Counterparty, Document, DocumentStatus, DocumentTotals, DocumentType, LineDiscount, LineItem,
    ListDocumentsFilter, PaymentMethod, VatCategory,
};
use crate::services::audit::AuditLog;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::numbering::{format_number, next_in_scope, NumberScope};
use crate::services::store::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "document_id, document_type, series, sequence_number, number, \
    issue_date, due_date, counterparty_id, counterparty_name, counterparty_vat_number, \
    counterparty_country, counterparty_city, counterparty_postal_code, counterparty_street, \
    currency, exchange_rate, payment_method, payment_terms, withholding_rate, subtotal, \
    discount_amount, vat_amount, withholding_amount, other_charges, total, paid_amount, \
    balance_due, status, compliance_status, compliance_mark, compliance_uid, cancellation_mark, \
    compliance_submitted_utc, compliance_attempted_utc, compliance_errors, notes, sent_to, \
    cancellation_reason, created_by, updated_by, locked_by, version, created_utc, updated_utc, \
    finalized_utc, sent_utc, viewed_utc, paid_utc, cancelled_utc, deleted_utc";

const LINE_COLUMNS: &str = "line_id, document_id, line_number, description, quantity, unit, \
    unit_price, discount_kind, discount_value, discount_amount, vat_category, vat_rate, \
    net_amount, vat_amount, total_amount, income_classification";

const AUDIT_COLUMNS: &str =
    "audit_id, entity_type, entity_id, actor, action, occurred_utc, changes, outcome, message";

const NUMBER_SCOPE_INDEX: &str = "documents_number_scope_key";

#[derive(Debug, FromRow)]
struct DocumentRow {
    document_id: Uuid,
    document_type: String,
    series: String,
    sequence_number: Option<i64>,
    number: Option<String>,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    counterparty_id: Option<Uuid>,
    counterparty_name: String,
    counterparty_vat_number: Option<String>,
    counterparty_country: Option<String>,
    counterparty_city: Option<String>,
    counterparty_postal_code: Option<String>,
    counterparty_street: Option<String>,
    currency: String,
    exchange_rate: Decimal,
    payment_method: String,
    payment_terms: Option<String>,
    withholding_rate: Option<Decimal>,
    subtotal: Decimal,
    discount_amount: Decimal,
    vat_amount: Decimal,
    withholding_amount: Decimal,
    other_charges: Decimal,
    total: Decimal,
    paid_amount: Decimal,
    balance_due: Decimal,
    status: String,
    compliance_status: String,
    compliance_mark: Option<String>,
    compliance_uid: Option<String>,
    cancellation_mark: Option<String>,
    compliance_submitted_utc: Option<DateTime<Utc>>,
    compliance_attempted_utc: Option<DateTime<Utc>>,
    compliance_errors: Json<Vec<AuthorityError>>,
    notes: Option<String>,
    sent_to: Option<String>,
    cancellation_reason: Option<String>,
    created_by: String,
    updated_by: String,
    locked_by: Option<String>,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    finalized_utc: Option<DateTime<Utc>>,
    sent_utc: Option<DateTime<Utc>>,
    viewed_utc: Option<DateTime<Utc>>,
    paid_utc: Option<DateTime<Utc>>,
    cancelled_utc: Option<DateTime<Utc>>,
    deleted_utc: Option<DateTime<Utc>>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = DocumentError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Document {
            document_id: row.document_id,
            document_type: parse_column("document_type", &row.document_type, DocumentType::parse)?,
            series: row.series,
            sequence_number: row.sequence_number,
            number: row.number,
            issue_date: row.issue_date,
            due_date: row.due_date,
            counterparty: Counterparty {
                counterparty_id: row.counterparty_id,
                name: row.counterparty_name,
                vat_number: row.counterparty_vat_number,
                country: row.counterparty_country,
                city: row.counterparty_city,
                postal_code: row.counterparty_postal_code,
                street: row.counterparty_street,
            },
            currency: row.currency,
            exchange_rate: row.exchange_rate,
            payment_method: parse_column(
                "payment_method",
                &row.payment_method,
                PaymentMethod::parse,
            )?,
            payment_terms: row.payment_terms,
            withholding_rate: row.withholding_rate,
            totals: DocumentTotals {
                subtotal: row.subtotal,
                discount_amount: row.discount_amount,
                vat_amount: row.vat_amount,
                withholding_amount: row.withholding_amount,
                other_charges: row.other_charges,
                total: row.total,
            },
            paid_amount: row.paid_amount,
            balance_due: row.balance_due,
            status: parse_column("status", &row.status, DocumentStatus::parse)?,
            compliance: ComplianceRecord {
                status: parse_column(
                    "compliance_status",
                    &row.compliance_status,
                    ComplianceStatus::parse,
                )?,
                mark: row.compliance_mark,
                uid: row.compliance_uid,
                cancellation_mark: row.cancellation_mark,
                submitted_utc: row.compliance_submitted_utc,
                attempted_utc: row.compliance_attempted_utc,
                errors: row.compliance_errors.0,
            },
            notes: row.notes,
            sent_to: row.sent_to,
            cancellation_reason: row.cancellation_reason,
            created_by: row.created_by,
            updated_by: row.updated_by,
            locked_by: row.locked_by,
            version: row.version,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            finalized_utc: row.finalized_utc,
            sent_utc: row.sent_utc,
            viewed_utc: row.viewed_utc,
            paid_utc: row.paid_utc,
            cancelled_utc: row.cancelled_utc,
            deleted_utc: row.deleted_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    line_id: Uuid,
    document_id: Uuid,
    line_number: i32,
    description: String,
    quantity: Decimal,
    unit: String,
    unit_price: Decimal,
    discount_kind: String,
    discount_value: Decimal,
    discount_amount: Decimal,
    vat_category: String,
    vat_rate: Decimal,
    net_amount: Decimal,
    vat_amount: Decimal,
    total_amount: Decimal,
    income_classification: Option<String>,
}

impl TryFrom<LineRow> for LineItem {
    type Error = DocumentError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let discount = LineDiscount::from_parts(&row.discount_kind, row.discount_value)
            .ok_or_else(|| unknown_value("discount_kind", &row.discount_kind))?;
        Ok(LineItem {
            line_id: row.line_id,
            document_id: row.document_id,
            line_number: row.line_number,
            description: row.description,
            quantity: row.quantity,
            unit: row.unit,
            unit_price: row.unit_price,
            discount,
            discount_amount: row.discount_amount,
            vat_category: parse_column("vat_category", &row.vat_category, VatCategory::parse)?,
            vat_rate: row.vat_rate,
            net_amount: row.net_amount,
            vat_amount: row.vat_amount,
            total_amount: row.total_amount,
            income_classification: row.income_classification,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    audit_id: Uuid,
    entity_type: String,
    entity_id: String,
    actor: String,
    action: String,
    occurred_utc: DateTime<Utc>,
    changes: Json<serde_json::Value>,
    outcome: String,
    message: Option<String>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DocumentError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            audit_id: row.audit_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            actor: row.actor,
            action: row.action,
            occurred_utc: row.occurred_utc,
            changes: row.changes.0,
            outcome: parse_column("outcome", &row.outcome, AuditOutcome::parse)?,
            message: row.message,
        })
    }
}

fn parse_column<T>(column: &str, value: &str, parse: fn(&str) -> Option<T>) -> DocumentResult<T> {
    parse(value).ok_or_else(|| unknown_value(column, value))
}

fn unknown_value(column: &str, value: &str) -> DocumentError {
    DocumentError::Persistence(anyhow::anyhow!(
        "Unknown value '{}' in column {}",
        value,
        column
    ))
}

fn is_number_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.constraint() == Some(NUMBER_SCOPE_INDEX)
        }
        _ => false,
    }
}

fn map_number_error(err: sqlx::Error, scope: &NumberScope, number: i64, context: &str) -> DocumentError {
    if is_number_collision(&err) {
        return DocumentError::NumberTaken {
            scope: scope.to_string(),
            number,
        };
    }
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            DocumentError::Conflict(format!("{}: {}", context, db_err))
        }
        _ => DocumentError::Persistence(anyhow::anyhow!("Failed to {}: {}", context, err)),
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "documents-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Serialize allocations in a scope and return the next free number.
    ///
    /// The advisory lock is released when the surrounding transaction ends.
    async fn next_sequence(
        tx: &mut Transaction<'_, Postgres>,
        scope: &NumberScope,
    ) -> DocumentResult<i64> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(scope.lock_key())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to lock number scope: {}", e))
            })?;

        let current_max = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(sequence_number)
            FROM documents
            WHERE document_type = $1 AND series = $2 AND issue_year = $3
            "#,
        )
        .bind(scope.document_type.as_str())
        .bind(&scope.series)
        .bind(scope.year)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to read sequence: {}", e))
        })?;

        Ok(next_in_scope(current_max))
    }

    /// Compare-and-set write of the mutable header fields.
    async fn write_header<'e, E>(
        executor: E,
        document: &Document,
        expected_version: i64,
    ) -> DocumentResult<Document>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            r#"
            UPDATE documents
            SET due_date = $3,
                counterparty_id = $4,
                counterparty_name = $5,
                counterparty_vat_number = $6,
                counterparty_country = $7,
                counterparty_city = $8,
                counterparty_postal_code = $9,
                counterparty_street = $10,
                currency = $11,
                exchange_rate = $12,
                payment_method = $13,
                payment_terms = $14,
                withholding_rate = $15,
                subtotal = $16,
                discount_amount = $17,
                vat_amount = $18,
                withholding_amount = $19,
                other_charges = $20,
                total = $21,
                paid_amount = $22,
                balance_due = $23,
                status = $24,
                notes = $25,
                sent_to = $26,
                cancellation_reason = $27,
                updated_by = $28,
                locked_by = $29,
                finalized_utc = $30,
                sent_utc = $31,
                viewed_utc = $32,
                paid_utc = $33,
                cancelled_utc = $34,
                deleted_utc = $35,
                version = version + 1,
                updated_utc = NOW()
            WHERE document_id = $1 AND version = $2
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );

        let counterparty = &document.counterparty;
        let totals = &document.totals;
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document.document_id)
            .bind(expected_version)
            .bind(document.due_date)
            .bind(counterparty.counterparty_id)
            .bind(&counterparty.name)
            .bind(&counterparty.vat_number)
            .bind(&counterparty.country)
            .bind(&counterparty.city)
            .bind(&counterparty.postal_code)
            .bind(&counterparty.street)
            .bind(&document.currency)
            .bind(document.exchange_rate)
            .bind(document.payment_method.as_str())
            .bind(&document.payment_terms)
            .bind(document.withholding_rate)
            .bind(totals.subtotal)
            .bind(totals.discount_amount)
            .bind(totals.vat_amount)
            .bind(totals.withholding_amount)
            .bind(totals.other_charges)
            .bind(totals.total)
            .bind(document.paid_amount)
            .bind(document.balance_due)
            .bind(document.status.as_str())
            .bind(&document.notes)
            .bind(&document.sent_to)
            .bind(&document.cancellation_reason)
            .bind(&document.updated_by)
            .bind(&document.locked_by)
            .bind(document.finalized_utc)
            .bind(document.sent_utc)
            .bind(document.viewed_utc)
            .bind(document.paid_utc)
            .bind(document.cancelled_utc)
            .bind(document.deleted_utc)
            .fetch_optional(executor)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to update document: {}", e))
            })?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DocumentError::Conflict(format!(
                "document {} was modified concurrently (expected version {})",
                document.document_id, expected_version
            ))),
        }
    }

    async fn insert_line<'e, E>(executor: E, line: &LineItem) -> DocumentResult<()>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "INSERT INTO document_lines ({}) VALUES ({})",
            LINE_COLUMNS,
            placeholders(16)
        );
        sqlx::query(&sql)
            .bind(line.line_id)
            .bind(line.document_id)
            .bind(line.line_number)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(&line.unit)
            .bind(line.unit_price)
            .bind(line.discount.kind())
            .bind(line.discount.value())
            .bind(line.discount_amount)
            .bind(line.vat_category.as_str())
            .bind(line.vat_rate)
            .bind(line.net_amount)
            .bind(line.vat_amount)
            .bind(line.total_amount)
            .bind(&line.income_classification)
            .execute(executor)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!(
                    "Failed to insert line {}: {}",
                    line.line_number,
                    e
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> DocumentResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DocumentError::Persistence(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, document, lines), fields(document_id = %document.document_id))]
    async fn insert_document(
        &self,
        document: &Document,
        lines: &[LineItem],
        scope: Option<&NumberScope>,
    ) -> DocumentResult<Document> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_document"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut stored = document.clone();
        if let Some(scope) = scope {
            let next = Self::next_sequence(&mut tx, scope).await?;
            stored.sequence_number = Some(next);
            stored.number = Some(format_number(&scope.series, next));
        }

        let sql = format!(
            "INSERT INTO documents ({}, issue_year) VALUES ({}) RETURNING {}",
            DOCUMENT_COLUMNS,
            placeholders(51),
            DOCUMENT_COLUMNS
        );
        let counterparty = &stored.counterparty;
        let totals = &stored.totals;
        let compliance = &stored.compliance;
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(stored.document_id)
            .bind(stored.document_type.as_str())
            .bind(&stored.series)
            .bind(stored.sequence_number)
            .bind(&stored.number)
            .bind(stored.issue_date)
            .bind(stored.due_date)
            .bind(counterparty.counterparty_id)
            .bind(&counterparty.name)
            .bind(&counterparty.vat_number)
            .bind(&counterparty.country)
            .bind(&counterparty.city)
            .bind(&counterparty.postal_code)
            .bind(&counterparty.street)
            .bind(&stored.currency)
            .bind(stored.exchange_rate)
            .bind(stored.payment_method.as_str())
            .bind(&stored.payment_terms)
            .bind(stored.withholding_rate)
            .bind(totals.subtotal)
            .bind(totals.discount_amount)
            .bind(totals.vat_amount)
            .bind(totals.withholding_amount)
            .bind(totals.other_charges)
            .bind(totals.total)
            .bind(stored.paid_amount)
            .bind(stored.balance_due)
            .bind(stored.status.as_str())
            .bind(compliance.status.as_str())
            .bind(&compliance.mark)
            .bind(&compliance.uid)
            .bind(&compliance.cancellation_mark)
            .bind(compliance.submitted_utc)
            .bind(compliance.attempted_utc)
            .bind(Json(&compliance.errors))
            .bind(&stored.notes)
            .bind(&stored.sent_to)
            .bind(&stored.cancellation_reason)
            .bind(&stored.created_by)
            .bind(&stored.updated_by)
            .bind(&stored.locked_by)
            .bind(stored.version)
            .bind(stored.created_utc)
            .bind(stored.updated_utc)
            .bind(stored.finalized_utc)
            .bind(stored.sent_utc)
            .bind(stored.viewed_utc)
            .bind(stored.paid_utc)
            .bind(stored.cancelled_utc)
            .bind(stored.deleted_utc)
            .bind(stored.issue_date.year())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match scope {
                Some(scope) => map_number_error(
                    e,
                    scope,
                    stored.sequence_number.unwrap_or_default(),
                    "insert document",
                ),
                None => DocumentError::Persistence(anyhow::anyhow!(
                    "Failed to insert document: {}",
                    e
                )),
            })?;

        for line in lines {
            Self::insert_line(&mut *tx, line).await?;
        }

        tx.commit().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        let document: Document = row.try_into()?;
        info!(
            document_id = %document.document_id,
            number = document.number.as_deref().unwrap_or(""),
            line_count = lines.len(),
            "Document inserted"
        );
        Ok(document)
    }

    #[instrument(skip(self, scope), fields(document_id = %document_id, scope = %scope))]
    async fn assign_number(
        &self,
        document_id: Uuid,
        expected_version: i64,
        scope: &NumberScope,
    ) -> DocumentResult<Document> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_number"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let next = Self::next_sequence(&mut tx, scope).await?;
        let sql = format!(
            r#"
            UPDATE documents
            SET sequence_number = $3,
                number = $4,
                version = version + 1,
                updated_utc = NOW()
            WHERE document_id = $1 AND version = $2 AND sequence_number IS NULL
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(expected_version)
            .bind(next)
            .bind(format_number(&scope.series, next))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_number_error(e, scope, next, "assign number"))?
            .ok_or_else(|| {
                DocumentError::Conflict(format!(
                    "document {} was modified concurrently or is already numbered",
                    document_id
                ))
            })?;

        tx.commit().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(document_id = %document_id, number = next, "Document number assigned");
        row.try_into()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn get_document(&self, document_id: Uuid) -> DocumentResult<Option<Document>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM documents WHERE document_id = $1",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DocumentError::Persistence(anyhow::anyhow!("Failed to get document: {}", e)))?;

        timer.observe_duration();

        row.map(Document::try_from).transpose()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn get_lines(&self, document_id: Uuid) -> DocumentResult<Vec<LineItem>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_lines"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM document_lines WHERE document_id = $1 ORDER BY line_number",
            LINE_COLUMNS
        );
        let rows = sqlx::query_as::<_, LineRow>(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DocumentError::Persistence(anyhow::anyhow!("Failed to get lines: {}", e)))?;

        timer.observe_duration();

        rows.into_iter().map(LineItem::try_from).collect()
    }

    #[instrument(skip(self, filter))]
    async fn list_documents(&self, filter: &ListDocumentsFilter) -> DocumentResult<Vec<Document>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_documents"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let overdue_on = filter
            .overdue_on
            .unwrap_or_else(|| Utc::now().date_naive());
        let (status, overdue) = match filter.status {
            Some(DocumentStatus::Overdue) => (None, true),
            Some(status) => (Some(status.as_str()), false),
            None => (None, false),
        };

        let sql = format!(
            r#"
            SELECT {}
            FROM documents
            WHERE ($1::bool OR deleted_utc IS NULL)
              AND ($2::varchar IS NULL OR document_type = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::bool = FALSE OR (
                    status NOT IN ('draft', 'paid', 'cancelled')
                    AND due_date < $5
                    AND balance_due > 0))
              AND ($6::varchar IS NULL OR series = $6)
              AND ($7::varchar IS NULL OR counterparty_vat_number = $7)
              AND ($8::date IS NULL OR issue_date >= $8)
              AND ($9::date IS NULL OR issue_date <= $9)
              AND ($10::uuid IS NULL OR document_id > $10)
            ORDER BY document_id
            LIMIT $11
            "#,
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(filter.include_deleted)
            .bind(filter.document_type.map(|t| t.as_str()))
            .bind(status)
            .bind(overdue)
            .bind(overdue_on)
            .bind(&filter.series)
            .bind(&filter.counterparty_vat_number)
            .bind(filter.issue_from)
            .bind(filter.issue_to)
            .bind(filter.page_token)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to list documents: {}", e))
            })?;

        timer.observe_duration();

        rows.into_iter().map(Document::try_from).collect()
    }

    #[instrument(skip(self, document), fields(document_id = %document.document_id))]
    async fn update_document(
        &self,
        document: &Document,
        expected_version: i64,
    ) -> DocumentResult<Document> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_document"])
            .start_timer();

        let updated = Self::write_header(&self.pool, document, expected_version).await?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self, document, lines), fields(document_id = %document.document_id))]
    async fn replace_lines(
        &self,
        document: &Document,
        lines: &[LineItem],
        expected_version: i64,
    ) -> DocumentResult<Document> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_lines"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let updated = Self::write_header(&mut *tx, document, expected_version).await?;

        sqlx::query("DELETE FROM document_lines WHERE document_id = $1")
            .bind(document.document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to delete lines: {}", e))
            })?;

        for line in lines {
            Self::insert_line(&mut *tx, line).await?;
        }

        tx.commit().await.map_err(|e| {
            DocumentError::Persistence(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self, record), fields(document_id = %document_id, status = %record.status))]
    async fn update_compliance(
        &self,
        document_id: Uuid,
        record: &ComplianceRecord,
        expected_version: Option<i64>,
    ) -> DocumentResult<Document> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_compliance"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE documents
            SET compliance_status = $3,
                compliance_mark = $4,
                compliance_uid = $5,
                cancellation_mark = $6,
                compliance_submitted_utc = $7,
                compliance_attempted_utc = $8,
                compliance_errors = $9,
                version = version + 1,
                updated_utc = NOW()
            WHERE document_id = $1 AND ($2::bigint IS NULL OR version = $2)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(expected_version)
            .bind(record.status.as_str())
            .bind(&record.mark)
            .bind(&record.uid)
            .bind(&record.cancellation_mark)
            .bind(record.submitted_utc)
            .bind(record.attempted_utc)
            .bind(Json(&record.errors))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    DocumentError::Conflict(format!(
                        "compliance mark {} is already recorded on another document",
                        record.mark.as_deref().unwrap_or("")
                    ))
                }
                _ => DocumentError::Persistence(anyhow::anyhow!(
                    "Failed to update compliance record: {}",
                    e
                )),
            })?;

        timer.observe_duration();

        match (row, expected_version) {
            (Some(row), _) => row.try_into(),
            (None, Some(expected)) => Err(DocumentError::Conflict(format!(
                "document {} was modified concurrently (expected version {})",
                document_id, expected
            ))),
            (None, None) => Err(DocumentError::not_found("document", document_id)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_mark(&self, mark: &str) -> DocumentResult<Option<Document>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_mark"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM documents WHERE compliance_mark = $1",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(mark)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to find document by mark: {}", e))
            })?;

        timer.observe_duration();

        row.map(Document::try_from).transpose()
    }
}

#[async_trait]
impl AuditLog for Database {
    #[instrument(skip(self, entry), fields(action = %entry.action, entity_id = %entry.entity_id))]
    async fn append(&self, entry: &AuditEntry) -> DocumentResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_audit"])
            .start_timer();

        let sql = format!(
            "INSERT INTO audit_log ({}) VALUES ({})",
            AUDIT_COLUMNS,
            placeholders(9)
        );
        sqlx::query(&sql)
            .bind(entry.audit_id)
            .bind(&entry.entity_type)
            .bind(&entry.entity_id)
            .bind(&entry.actor)
            .bind(&entry.action)
            .bind(entry.occurred_utc)
            .bind(Json(&entry.changes))
            .bind(entry.outcome.as_str())
            .bind(&entry.message)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to append audit entry: {}", e))
            })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, query))]
    async fn query(&self, query: &AuditQuery) -> DocumentResult<Vec<AuditEntry>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_audit"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM audit_log
            WHERE ($1::varchar IS NULL OR entity_type = $1)
              AND ($2::varchar IS NULL OR entity_id = $2)
              AND ($3::varchar IS NULL OR actor = $3)
              AND ($4::varchar IS NULL OR action = $4)
              AND ($5::timestamptz IS NULL OR occurred_utc >= $5)
              AND ($6::timestamptz IS NULL OR occurred_utc <= $6)
            ORDER BY occurred_utc DESC
            LIMIT $7
            "#,
            AUDIT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(&query.entity_type)
            .bind(&query.entity_id)
            .bind(&query.actor)
            .bind(&query.action)
            .bind(query.from)
            .bind(query.to)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DocumentError::Persistence(anyhow::anyhow!("Failed to query audit log: {}", e))
            })?;

        timer.observe_duration();

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "$1, $2, $3");
    }

    #[test]
    fn test_column_lists_match_placeholder_counts() {
        assert_eq!(DOCUMENT_COLUMNS.split(',').count(), 50);
        assert_eq!(LINE_COLUMNS.split(',').count(), 16);
        assert_eq!(AUDIT_COLUMNS.split(',').count(), 9);
    }

    #[test]
    fn test_line_row_rejects_unknown_discount_kind() {
        let row = LineRow {
            line_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            line_number: 1,
            description: "Consulting".to_string(),
            quantity: Decimal::ONE,
            unit: "h".to_string(),
            unit_price: Decimal::ONE,
            discount_kind: "coupon".to_string(),
            discount_value: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            vat_category: "normal".to_string(),
            vat_rate: Decimal::from(24),
            net_amount: Decimal::ONE,
            vat_amount: Decimal::ZERO,
            total_amount: Decimal::ONE,
            income_classification: None,
        };
        assert!(matches!(
            LineItem::try_from(row),
            Err(DocumentError::Persistence(_))
        ));
    }
}
