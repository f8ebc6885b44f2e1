//! HTTP client for the tax authority.

use super::schema::{from_xml, DocStatusResponse, InvoicesDoc, ResponseDoc};
use crate::config::ComplianceConfig;
use crate::error::{DocumentError, DocumentResult};
use crate::services::metrics::COMPLIANCE_REQUEST_DURATION;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const USER_ID_HEADER: &str = "aade-user-id";
const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";

/// Operations offered by the tax authority.
#[async_trait]
pub trait ComplianceAuthority: Send + Sync {
    async fn send_invoices(&self, payload: &InvoicesDoc) -> DocumentResult<ResponseDoc>;

    async fn cancel_invoice(&self, mark: &str) -> DocumentResult<ResponseDoc>;

    async fn request_status(&self, mark: &str) -> DocumentResult<DocStatusResponse>;

    /// Cheapest authenticated call, used to verify credentials.
    async fn ping(&self) -> DocumentResult<()>;
}

#[derive(Clone)]
pub struct AuthorityClient {
    client: Client,
    config: ComplianceConfig,
}

impl AuthorityClient {
    pub fn new(config: ComplianceConfig) -> DocumentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                DocumentError::ExternalService(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    /// Check if credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
            && !self.config.user_id.is_empty()
            && !self.config.subscription_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(USER_ID_HEADER, &self.config.user_id)
            .header(
                SUBSCRIPTION_KEY_HEADER,
                self.config.subscription_key.expose_secret(),
            )
    }

    /// Send a request and return the body of a 2xx response.
    async fn execute(&self, operation: &str, request: RequestBuilder) -> DocumentResult<String> {
        if !self.is_configured() {
            return Err(DocumentError::ExternalService(
                "Compliance authority credentials not configured".to_string(),
            ));
        }

        let timer = COMPLIANCE_REQUEST_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = self.authorized(request).send().await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                timer.observe_duration();
                warn!(operation, error = %e, "Compliance authority request failed");
                return Err(if e.is_timeout() {
                    DocumentError::ExternalTimeout(format!("{} timed out", operation))
                } else {
                    DocumentError::ExternalService(format!("{} failed: {}", operation, e))
                });
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            DocumentError::ExternalService(format!("Failed to read {} response: {}", operation, e))
        })?;
        timer.observe_duration();

        debug!(operation, status = %status, body = %body, "Compliance authority response");

        if status.is_success() {
            Ok(body)
        } else {
            warn!(operation, status = %status, "Compliance authority returned an error status");
            Err(DocumentError::ExternalService(format!(
                "{} returned HTTP {}: {}",
                operation, status, body
            )))
        }
    }
}

#[async_trait]
impl ComplianceAuthority for AuthorityClient {
    #[instrument(skip(self, payload), fields(invoices = payload.invoice.len()))]
    async fn send_invoices(&self, payload: &InvoicesDoc) -> DocumentResult<ResponseDoc> {
        let xml = payload.to_xml()?;
        let request = self
            .client
            .post(self.url("SendInvoices"))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml);

        let body = self.execute("send_invoices", request).await?;
        let response: ResponseDoc = from_xml(&body)?;
        info!(items = response.response.len(), "Invoices sent to authority");
        Ok(response)
    }

    #[instrument(skip(self))]
    async fn cancel_invoice(&self, mark: &str) -> DocumentResult<ResponseDoc> {
        let request = self
            .client
            .post(self.url("CancelInvoice"))
            .query(&[("mark", mark)]);

        let body = self.execute("cancel_invoice", request).await?;
        Ok(from_xml(&body)?)
    }

    #[instrument(skip(self))]
    async fn request_status(&self, mark: &str) -> DocumentResult<DocStatusResponse> {
        let request = self
            .client
            .get(self.url("RequestDocStatus"))
            .query(&[("mark", mark)]);

        let body = self.execute("request_status", request).await?;
        Ok(from_xml(&body)?)
    }

    #[instrument(skip(self))]
    async fn ping(&self) -> DocumentResult<()> {
        let request = self
            .client
            .get(self.url("RequestTransmittedDocs"))
            .query(&[("mark", "0")]);

        self.execute("ping", request).await.map(|_| ())
    }
}
