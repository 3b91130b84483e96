//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::routes::{self, BoxBody};
use crate::signing::SigningOrchestrator;
use crate::types::SignerError;

/// Shared application state
pub struct AppState {
    pub node_id: Uuid,
    pub orchestrator: Arc<SigningOrchestrator>,
    pub blob_store: Arc<dyn BlobStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        node_id: Uuid,
        orchestrator: Arc<SigningOrchestrator>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            node_id,
            orchestrator,
            blob_store,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections on `listen` until the task is dropped
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<(), SignerError> {
    let listener = TcpListener::bind(listen).await?;

    info!("Cosigner listening on {} as node {}", listen, state.node_id);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    let response = match path.as_str() {
        "/api/sign" => routes::handle_sign_request(req, state).await,
        "/health" | "/healthz" => match method {
            Method::GET => routes::health_response(state),
            _ => routes::method_not_allowed(),
        },
        _ => {
            let download = path
                .strip_prefix("/download/")
                .map(|token| (token, false))
                .or_else(|| path.strip_prefix("/view/").map(|token| (token, true)));

            match (download, method) {
                (Some((token, inline)), Method::GET) => {
                    routes::handle_download(state, token, query.as_deref(), inline).await
                }
                (Some(_), _) => routes::method_not_allowed(),
                (None, _) => routes::not_found(),
            }
        }
    };

    Ok(response)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::crypto::{otp, MasterKey};
    use crate::services::DocumentSigner;
    use crate::session::{DeliveryTask, InMemorySessionRepository, SessionRepository, SigningSession};
    use crate::signing::SigningConfig;
    use bytes::Bytes;

    struct AppendingSigner;

    #[async_trait::async_trait]
    impl DocumentSigner for AppendingSigner {
        async fn sign(&self, document: Bytes, _: &str, _: &str) -> crate::types::Result<Bytes> {
            let mut signed = document.to_vec();
            signed.extend_from_slice(b"\n%signed");
            Ok(Bytes::from(signed))
        }
    }

    /// State with one pending session `t1` (code 123456) over `doc.pdf`
    pub(crate) async fn test_state() -> (Arc<AppState>, Arc<InMemorySessionRepository>) {
        let repo = Arc::new(InMemorySessionRepository::new());
        let blobs = Arc::new(InMemoryBlobStore::new());

        let task = DeliveryTask {
            token: "t1".into(),
            email: "a@b.com".into(),
            blob_key: "doc.pdf".into(),
        };
        repo.create_if_absent(SigningSession::new(&task, otp::hash_code("123456").unwrap()))
            .await
            .unwrap();
        blobs.insert("doc.pdf", Bytes::from_static(b"%PDF-1.7 original")).await;

        let orchestrator = SigningOrchestrator::new(
            SigningConfig::default(),
            MasterKey::from_bytes([1u8; 32]),
            repo.clone(),
            blobs.clone(),
            Arc::new(AppendingSigner),
        );

        let state = AppState::new(Uuid::new_v4(), Arc::new(orchestrator), blobs);
        (Arc::new(state), repo)
    }
}
