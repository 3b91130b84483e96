//! End-to-end signing flow over in-memory storage and a mocked signer

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::StatusCode;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cosigner::blob::{BlobStore, InMemoryBlobStore};
use cosigner::crypto::MasterKey;
use cosigner::issuer::{CodeDispatcher, IssueOutcome, OtpIssuer};
use cosigner::nats::OtpNotice;
use cosigner::routes::{handle_download, handle_sign, BoxBody};
use cosigner::services::{HttpDocumentSigner, HttpDocumentSignerConfig};
use cosigner::session::{DeliveryTask, InMemorySessionRepository, SessionRepository};
use cosigner::signing::{SigningConfig, SigningOrchestrator};
use cosigner::{AppState, Result};

#[derive(Default)]
struct Outbox {
    codes: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CodeDispatcher for Outbox {
    async fn dispatch(&self, notice: &OtpNotice) -> Result<()> {
        self.codes
            .lock()
            .await
            .push((notice.token.clone(), notice.code.clone()));
        Ok(())
    }
}

async fn body_bytes(response: hyper::Response<BoxBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: hyper::Response<BoxBody>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn sign_body(token: &str, password: &str) -> Bytes {
    Bytes::from(json!({ "token": token, "password": password }).to_string())
}

#[tokio::test]
async fn test_issue_verify_sign_download() {
    let signer_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 signed".to_vec()))
        .expect(1)
        .mount(&signer_mock)
        .await;

    let repository = Arc::new(InMemorySessionRepository::new());
    let blob_store = Arc::new(InMemoryBlobStore::new());
    blob_store.insert("doc.pdf", &b"%PDF-1.7 original"[..]).await;

    let outbox = Arc::new(Outbox::default());
    let issuer = OtpIssuer::new(repository.clone(), outbox.clone());

    let task = DeliveryTask {
        token: "t1".into(),
        email: "a@b.com".into(),
        blob_key: "doc.pdf".into(),
    };
    assert_eq!(issuer.issue(task.clone()).await.unwrap(), IssueOutcome::Created);
    assert_eq!(issuer.issue(task).await.unwrap(), IssueOutcome::Duplicate);

    let code = {
        let codes = outbox.codes.lock().await;
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].0, "t1");
        codes[0].1.clone()
    };
    let wrong = if code == "000000" { "000001" } else { "000000" };

    let signer = HttpDocumentSigner::new(HttpDocumentSignerConfig {
        endpoint: format!("{}/sign", signer_mock.uri()),
        request_timeout: std::time::Duration::from_secs(5),
    })
    .unwrap();

    let orchestrator = SigningOrchestrator::new(
        SigningConfig::default(),
        MasterKey::from_bytes([9u8; 32]),
        repository.clone(),
        blob_store.clone(),
        Arc::new(signer),
    );
    let state = Arc::new(AppState::new(
        Uuid::new_v4(),
        Arc::new(orchestrator),
        blob_store.clone(),
    ));

    let response = handle_sign(state.clone(), sign_body("t1", wrong)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "Invalid code. Attempts remaining: 2" })
    );
    assert_eq!(repository.find("t1").await.unwrap().unwrap().attempts, 1);

    // Nothing signed yet
    let response = handle_download(state.clone(), "t1", Some("signed=1"), false).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = handle_sign(state.clone(), sign_body("t1", &code)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "status": "success", "signed_url": "/download/t1?signed=1" })
    );

    let session = repository.find("t1").await.unwrap().unwrap();
    assert!(session.is_used());
    let artifacts = session.artifacts.unwrap();
    assert!(artifacts.certificate_pem.contains("BEGIN CERTIFICATE"));
    assert!(!artifacts.encrypted_private_key.contains("PRIVATE KEY"));
    assert_eq!(artifacts.signed_blob_key, "signed/doc.pdf");
    assert_eq!(
        blob_store.fetch("signed/doc.pdf").await.unwrap(),
        Bytes::from_static(b"%PDF-1.7 signed")
    );

    let response = handle_download(state.clone(), "t1", Some("signed=1"), false).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"signed-doc.pdf\""
    );
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"%PDF-1.7 signed"));

    let response = handle_download(state.clone(), "t1", None, true).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        "inline; filename=\"doc.pdf\""
    );
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"%PDF-1.7 original"));

    // Same code again: the session is immutable now
    let response = handle_sign(state, sign_body("t1", &code)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await, json!({ "error": "Document already signed" }));
}

#[tokio::test]
async fn test_three_wrong_codes_lock_the_session() {
    let repository = Arc::new(InMemorySessionRepository::new());
    let blob_store = Arc::new(InMemoryBlobStore::new());
    blob_store.insert("doc.pdf", &b"%PDF-1.7"[..]).await;

    let outbox = Arc::new(Outbox::default());
    OtpIssuer::new(repository.clone(), outbox.clone())
        .issue(DeliveryTask {
            token: "t2".into(),
            email: "c@d.org".into(),
            blob_key: "doc.pdf".into(),
        })
        .await
        .unwrap();
    let code = outbox.codes.lock().await[0].1.clone();
    let wrong = if code == "999999" { "999998" } else { "999999" };

    // Unreachable signer: a locked session must never get that far
    let signer = HttpDocumentSigner::new(HttpDocumentSignerConfig {
        endpoint: "http://127.0.0.1:9/sign".into(),
        request_timeout: std::time::Duration::from_secs(1),
    })
    .unwrap();
    let orchestrator = SigningOrchestrator::new(
        SigningConfig::default(),
        MasterKey::from_bytes([3u8; 32]),
        repository.clone(),
        blob_store.clone(),
        Arc::new(signer),
    );
    let state = Arc::new(AppState::new(Uuid::new_v4(), Arc::new(orchestrator), blob_store));

    for remaining in [2, 1, 0] {
        let response = handle_sign(state.clone(), sign_body("t2", wrong)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({ "error": format!("Invalid code. Attempts remaining: {}", remaining) })
        );
    }

    let response = handle_sign(state, sign_body("t2", &code)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await, json!({ "error": "Too many attempts. Session blocked." }));

    let session = repository.find("t2").await.unwrap().unwrap();
    assert_eq!(session.attempts, 3);
    assert!(!session.is_used());
}
