//! HTTP contract tests for the authority client.
//!
//! | Method | Path | Test |
//! |--------|------|------|
//! | POST   | `/SendInvoices` | `send_invoices_*` |
//! | POST   | `/CancelInvoice?mark=` | `cancel_invoice_*` |
//! | GET    | `/RequestDocStatus?mark=` | `request_status_*` |
//! | GET    | `/RequestTransmittedDocs?mark=0` | `ping_*` |

use documents_service::config::ComplianceConfig;
use documents_service::error::DocumentError;
use documents_service::services::compliance::{InvoicesDoc, ResponseOutcome};
use documents_service::services::{AuthorityClient, ComplianceAuthority};
use secrecy::Secret;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCEPTED: &str = r#"<ResponseDoc>
    <response>
        <index>1</index>
        <invoiceUid>8F3A</invoiceUid>
        <invoiceMark>400001234567</invoiceMark>
        <statusCode>Success</statusCode>
    </response>
</ResponseDoc>"#;

fn config(base_url: &str) -> ComplianceConfig {
    ComplianceConfig {
        base_url: base_url.to_string(),
        user_id: "issuer-user".to_string(),
        subscription_key: Secret::new("sub-key".to_string()),
        timeout_secs: 1,
        stale_pending_secs: 300,
    }
}

fn test_client(mock_server: &MockServer) -> AuthorityClient {
    AuthorityClient::new(config(&mock_server.uri())).unwrap()
}

#[tokio::test]
async fn send_invoices_posts_xml_with_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/SendInvoices"))
        .and(header("aade-user-id", "issuer-user"))
        .and(header("ocp-apim-subscription-key", "sub-key"))
        .and(header("content-type", "application/xml"))
        .and(body_string_contains("InvoicesDoc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ACCEPTED))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let response = client
        .send_invoices(&InvoicesDoc::new(Vec::new()))
        .await
        .unwrap();

    assert_eq!(response.response.len(), 1);
    assert_eq!(
        response.response[0].outcome().unwrap(),
        ResponseOutcome::Accepted {
            mark: "400001234567".to_string(),
            uid: Some("8F3A".to_string()),
            cancellation_mark: None,
        }
    );
}

#[tokio::test]
async fn send_invoices_server_error_is_external_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/SendInvoices"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .send_invoices(&InvoicesDoc::new(Vec::new()))
        .await
        .unwrap_err();

    match err {
        DocumentError::ExternalService(msg) => assert!(msg.contains("500")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn send_invoices_malformed_body_is_external_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/SendInvoices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ResponseDoc><response>"))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .send_invoices(&InvoicesDoc::new(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ExternalService(_)));
}

#[tokio::test]
async fn send_invoices_slow_authority_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/SendInvoices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ACCEPTED)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .send_invoices(&InvoicesDoc::new(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ExternalTimeout(_)));
}

#[tokio::test]
async fn cancel_invoice_passes_mark() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/CancelInvoice"))
        .and(query_param("mark", "400001234567"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<ResponseDoc>
                <response>
                    <cancellationMark>400001234599</cancellationMark>
                    <statusCode>Success</statusCode>
                </response>
            </ResponseDoc>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let response = client.cancel_invoice("400001234567").await.unwrap();

    assert_eq!(
        response.response[0].cancellation_mark.as_deref(),
        Some("400001234599")
    );
}

#[tokio::test]
async fn request_status_parses_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/RequestDocStatus"))
        .and(query_param("mark", "400001234567"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<DocStatusResponse>
                <mark>400001234567</mark>
                <status>accepted</status>
            </DocStatusResponse>"#,
        ))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let status = client.request_status("400001234567").await.unwrap();

    assert_eq!(status.mark, "400001234567");
    assert_eq!(status.status, "accepted");
    assert!(status.errors.is_none());
}

#[tokio::test]
async fn ping_rejected_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/RequestTransmittedDocs"))
        .and(query_param("mark", "0"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn unconfigured_client_makes_no_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut unconfigured = config(&mock_server.uri());
    unconfigured.subscription_key = Secret::new(String::new());
    let client = AuthorityClient::new(unconfigured).unwrap();

    assert!(!client.is_configured());
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, DocumentError::ExternalService(_)));
}
