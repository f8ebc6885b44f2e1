//! Tax authority submission gateway.
//!
//! A submission is three short steps: claim the document by writing a
//! `pending` compliance record under a version check, call the authority with
//! no transaction open, then write the outcome. A transport failure restores
//! the record that was there before the claim so the submission can be retried.

mod client;
mod schema;

pub use client::{AuthorityClient, ComplianceAuthority};
pub use schema::{
    build_invoice, from_xml, AuthorityInvoice, DocStatusResponse, ErrorList, InvoicesDoc,
    ResponseDoc, ResponseError, ResponseItem, ResponseOutcome, XmlError,
};

use crate::config::IssuerConfig;
use crate::error::{DocumentError, DocumentResult};
use crate::models::{AuthorityError, ComplianceRecord, ComplianceStatus, Document, DocumentStatus};
use crate::services::audit::{snapshot, AuditRecorder};
use crate::services::metrics::COMPLIANCE_SUBMISSIONS_TOTAL;
use crate::services::store::DocumentStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const ENTITY: &str = "document";
const SYSTEM_ACTOR: &str = "system";

/// Per-document result of a bulk submission.
#[derive(Debug)]
pub struct BulkSubmitOutcome {
    pub document_id: Uuid,
    pub result: DocumentResult<Document>,
}

#[derive(Debug, Default)]
pub struct BulkSubmitReport {
    pub outcomes: Vec<BulkSubmitOutcome>,
    pub submitted: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Result of polling the authority for a mark.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mark: String,
    pub remote_status: ComplianceStatus,
    pub errors: Vec<AuthorityError>,
    /// The local document carrying the mark, after any update.
    pub document: Option<Document>,
    pub updated: bool,
}

#[derive(Clone)]
pub struct ComplianceGateway {
    store: Arc<dyn DocumentStore>,
    authority: Arc<dyn ComplianceAuthority>,
    audit: AuditRecorder,
    issuer: IssuerConfig,
    stale_pending: Duration,
}

impl ComplianceGateway {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        authority: Arc<dyn ComplianceAuthority>,
        audit: AuditRecorder,
        issuer: IssuerConfig,
        stale_pending: Duration,
    ) -> Self {
        Self {
            store,
            authority,
            audit,
            issuer,
            stale_pending,
        }
    }

    /// Report a finalized document and record the mark it is certified with.
    ///
    /// A rejection is persisted on the document and also returned as
    /// `DocumentError::Compliance`.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn submit(&self, document_id: Uuid, actor: &str) -> DocumentResult<Document> {
        let document = self.load(document_id).await?;
        let now = Utc::now();
        self.ensure_submittable(&document, now)?;

        let lines = self.store.get_lines(document_id).await?;
        let payload = InvoicesDoc::new(vec![build_invoice(&document, &lines, &self.issuer)?]);

        let prior = document.compliance.clone();
        let claim = ComplianceRecord {
            status: ComplianceStatus::Pending,
            attempted_utc: Some(now),
            errors: Vec::new(),
            ..prior.clone()
        };
        let claimed = self
            .store
            .update_compliance(document_id, &claim, Some(document.version))
            .await?;

        let outcome = match self.authority.send_invoices(&payload).await {
            Ok(response) => first_outcome(response),
            Err(e) => Err(e),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.restore(document_id, &prior).await;
                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["submit", "failed"])
                    .inc();
                self.audit
                    .record_failure(ENTITY, document_id, actor, "submit", &e.to_string())
                    .await;
                return Err(e);
            }
        };

        match outcome {
            ResponseOutcome::Accepted { mark, uid, .. } => {
                let record = ComplianceRecord {
                    status: ComplianceStatus::Submitted,
                    mark: Some(mark.clone()),
                    uid,
                    cancellation_mark: None,
                    submitted_utc: Some(Utc::now()),
                    attempted_utc: claim.attempted_utc,
                    errors: Vec::new(),
                };
                // Unconditional write: the pending claim excludes other submitters,
                // but payments may have bumped the version since.
                let saved = match self
                    .store
                    .update_compliance(document_id, &record, None)
                    .await
                {
                    Ok(saved) => saved,
                    Err(e) => {
                        COMPLIANCE_SUBMISSIONS_TOTAL
                            .with_label_values(&["submit", "failed"])
                            .inc();
                        error!(
                            document_id = %document_id,
                            mark = %mark,
                            error = %e,
                            "Document certified but the mark could not be stored"
                        );
                        self.audit
                            .record_failure(
                                ENTITY,
                                document_id,
                                actor,
                                "submit",
                                &format!("mark {} issued but not stored: {}", mark, e),
                            )
                            .await;
                        return Err(DocumentError::MarkNotStored {
                            mark,
                            uid: record.uid,
                            source: Box::new(e),
                        });
                    }
                };

                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["submit", "submitted"])
                    .inc();
                info!(document_id = %document_id, mark = %mark, "Document certified");
                self.audit
                    .record(
                        ENTITY,
                        document_id,
                        actor,
                        "submit",
                        snapshot(&claimed.compliance),
                        snapshot(&saved.compliance),
                    )
                    .await;
                Ok(saved)
            }
            ResponseOutcome::Rejected {
                status_code,
                errors,
            } => {
                let record = ComplianceRecord {
                    status: ComplianceStatus::Rejected,
                    mark: None,
                    uid: None,
                    cancellation_mark: None,
                    submitted_utc: None,
                    attempted_utc: claim.attempted_utc,
                    errors: errors.clone(),
                };
                let saved = self
                    .store
                    .update_compliance(document_id, &record, None)
                    .await?;

                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["submit", "rejected"])
                    .inc();
                warn!(
                    document_id = %document_id,
                    status_code = %status_code,
                    error_count = errors.len(),
                    "Document rejected by the tax authority"
                );
                self.audit
                    .record(
                        ENTITY,
                        document_id,
                        actor,
                        "submit_rejected",
                        snapshot(&claimed.compliance),
                        snapshot(&saved.compliance),
                    )
                    .await;
                Err(DocumentError::Compliance {
                    message: format!(
                        "document {} rejected ({})",
                        saved.number.as_deref().unwrap_or("unnumbered"),
                        status_code
                    ),
                    errors,
                    mark: None,
                })
            }
        }
    }

    /// Withdraw a certified document at the authority.
    #[instrument(skip(self), fields(document_id = %document_id, actor = %actor))]
    pub async fn cancel_submission(
        &self,
        document_id: Uuid,
        actor: &str,
    ) -> DocumentResult<Document> {
        let document = self.load(document_id).await?;
        let mark = match (&document.compliance.mark, document.compliance.is_certified()) {
            (Some(mark), true) => mark.clone(),
            _ => {
                return Err(DocumentError::Validation(format!(
                    "document has no live compliance mark (status {})",
                    document.compliance.status
                )))
            }
        };

        let outcome = match self.authority.cancel_invoice(&mark).await {
            Ok(response) => first_outcome(response),
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["cancel", "failed"])
                    .inc();
                self.audit
                    .record_failure(ENTITY, document_id, actor, "cancel_submission", &e.to_string())
                    .await;
                return Err(e);
            }
        };

        match outcome {
            ResponseOutcome::Accepted {
                mark: returned,
                cancellation_mark,
                ..
            } => {
                let record = ComplianceRecord {
                    status: ComplianceStatus::Cancelled,
                    cancellation_mark: cancellation_mark.or(Some(returned)),
                    errors: Vec::new(),
                    ..document.compliance.clone()
                };
                let saved = self
                    .store
                    .update_compliance(document_id, &record, None)
                    .await?;

                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["cancel", "cancelled"])
                    .inc();
                info!(
                    document_id = %document_id,
                    mark = %mark,
                    cancellation_mark = saved.compliance.cancellation_mark.as_deref().unwrap_or(""),
                    "Compliance submission cancelled"
                );
                self.audit
                    .record(
                        ENTITY,
                        document_id,
                        actor,
                        "cancel_submission",
                        snapshot(&document.compliance),
                        snapshot(&saved.compliance),
                    )
                    .await;
                Ok(saved)
            }
            ResponseOutcome::Rejected {
                status_code,
                errors,
            } => {
                COMPLIANCE_SUBMISSIONS_TOTAL
                    .with_label_values(&["cancel", "rejected"])
                    .inc();
                self.audit
                    .record_failure(ENTITY, document_id, actor, "cancel_submission", &status_code)
                    .await;
                Err(DocumentError::Compliance {
                    message: format!("cancellation of mark {} rejected ({})", mark, status_code),
                    errors,
                    mark: Some(mark),
                })
            }
        }
    }

    /// Submit each document independently; one failure does not stop the rest.
    #[instrument(skip(self, document_ids), fields(count = document_ids.len(), actor = %actor))]
    pub async fn bulk_submit(&self, document_ids: &[Uuid], actor: &str) -> BulkSubmitReport {
        let mut report = BulkSubmitReport::default();
        for &document_id in document_ids {
            let result = self.submit(document_id, actor).await;
            match &result {
                Ok(_) => report.submitted += 1,
                Err(DocumentError::Compliance { .. }) => report.rejected += 1,
                Err(_) => report.failed += 1,
            }
            report.outcomes.push(BulkSubmitOutcome {
                document_id,
                result,
            });
        }

        info!(
            submitted = report.submitted,
            rejected = report.rejected,
            failed = report.failed,
            "Bulk submission finished"
        );
        report
    }

    /// Poll the authority for a mark and adopt a changed terminal state locally.
    #[instrument(skip(self))]
    pub async fn get_status(&self, mark: &str) -> DocumentResult<StatusReport> {
        let response = self.authority.request_status(mark).await?;
        let remote_status = ComplianceStatus::parse(&response.status).ok_or_else(|| {
            DocumentError::ExternalService(format!(
                "authority reported unknown status '{}'",
                response.status
            ))
        })?;
        let errors = schema::authority_errors(response.errors.as_ref());

        let Some(document) = self.store.find_by_mark(mark).await? else {
            return Ok(StatusReport {
                mark: mark.to_string(),
                remote_status,
                errors,
                document: None,
                updated: false,
            });
        };

        if !remote_status.is_terminal() || document.compliance.status == remote_status {
            return Ok(StatusReport {
                mark: mark.to_string(),
                remote_status,
                errors,
                document: Some(document),
                updated: false,
            });
        }

        let record = ComplianceRecord {
            status: remote_status,
            cancellation_mark: response
                .cancellation_mark
                .clone()
                .or_else(|| document.compliance.cancellation_mark.clone()),
            errors: errors.clone(),
            ..document.compliance.clone()
        };
        let saved = self
            .store
            .update_compliance(document.document_id, &record, None)
            .await?;

        info!(
            document_id = %saved.document_id,
            mark,
            from = %document.compliance.status,
            to = %remote_status,
            "Compliance status updated from authority"
        );
        self.audit
            .record(
                ENTITY,
                saved.document_id,
                SYSTEM_ACTOR,
                "sync_status",
                snapshot(&document.compliance),
                snapshot(&saved.compliance),
            )
            .await;

        Ok(StatusReport {
            mark: mark.to_string(),
            remote_status,
            errors,
            document: Some(saved),
            updated: true,
        })
    }

    /// Verify connectivity and credentials.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> DocumentResult<()> {
        self.authority.ping().await?;
        info!("Compliance authority connection verified");
        Ok(())
    }

    async fn load(&self, document_id: Uuid) -> DocumentResult<Document> {
        match self.store.get_document(document_id).await? {
            Some(document) if !document.is_deleted() => Ok(document),
            _ => Err(DocumentError::not_found(ENTITY, document_id)),
        }
    }

    fn ensure_submittable(&self, document: &Document, now: DateTime<Utc>) -> DocumentResult<()> {
        match document.status {
            DocumentStatus::Draft => {
                return Err(DocumentError::Validation(
                    "draft documents must be finalized before submission".to_string(),
                ))
            }
            DocumentStatus::Cancelled => {
                return Err(DocumentError::Validation(
                    "cancelled documents cannot be submitted".to_string(),
                ))
            }
            _ => {}
        }
        if document.document_type.authority_code().is_none() {
            return Err(DocumentError::Validation(format!(
                "{} documents are not reported to the tax authority",
                document.document_type
            )));
        }
        if document.compliance.is_certified() {
            return Err(DocumentError::Validation(format!(
                "document is already certified with mark {}",
                document.compliance.mark.as_deref().unwrap_or("")
            )));
        }
        if document.compliance.status == ComplianceStatus::Pending {
            let fresh = document.compliance.attempted_utc.is_some_and(|attempted| {
                (now - attempted)
                    .to_std()
                    .map(|age| age < self.stale_pending)
                    .unwrap_or(true)
            });
            if fresh {
                return Err(DocumentError::Conflict(
                    "a compliance submission is already in progress".to_string(),
                ));
            }
            warn!(document_id = %document.document_id, "Taking over a stale pending submission");
        }
        Ok(())
    }

    /// Put back the record that preceded a failed claim.
    async fn restore(&self, document_id: Uuid, prior: &ComplianceRecord) {
        if let Err(e) = self.store.update_compliance(document_id, prior, None).await {
            warn!(
                document_id = %document_id,
                error = %e,
                "Failed to restore compliance record after a failed submission"
            );
        }
    }
}

fn first_outcome(response: ResponseDoc) -> DocumentResult<ResponseOutcome> {
    response
        .response
        .first()
        .ok_or_else(|| {
            DocumentError::ExternalService("authority returned an empty response".to_string())
        })?
        .outcome()
}
