//! Cosigner - OTP-gated document co-signing service

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosigner::{
    blob::{HttpBlobStore, HttpBlobStoreConfig},
    config::Args,
    db::{MongoClient, MongoSessionRepository},
    issuer::{OtpIssuer, TaskConsumer, TaskConsumerConfig},
    nats::{NatsArtifactNotifier, NatsClient, NatsCodeDispatcher},
    server::{self, AppState},
    services::{HttpDocumentSigner, HttpDocumentSignerConfig},
    signing::{SigningConfig, SigningOrchestrator},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cosigner={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Cosigner - OTP-gated co-signing");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB database: {}", args.mongodb_db);
    info!("Blob store: {}", args.blob_store_url);
    info!("Task stream: {} ({})", args.task_stream, args.task_subject);
    info!("======================================");

    let master_key = args.master_key()?;
    let signer_url = args.signer_url()?.to_string();

    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    let repository = Arc::new(MongoSessionRepository::new(&mongo).await?);

    let nats = match NatsClient::new(&args.nats, &format!("cosigner-{}", args.node_id)).await {
        Ok(client) => client,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let blob_store = Arc::new(HttpBlobStore::new(HttpBlobStoreConfig {
        base_url: args.blob_store_url.clone(),
        token: args.blob_store_token.clone(),
        request_timeout: args.request_timeout(),
    })?);

    let signer = Arc::new(HttpDocumentSigner::new(HttpDocumentSignerConfig {
        endpoint: signer_url,
        request_timeout: args.request_timeout(),
    })?);

    let orchestrator = SigningOrchestrator::new(
        SigningConfig {
            call_timeout: args.request_timeout(),
            lease_ttl: args.signing_lease(),
        },
        master_key,
        repository.clone(),
        blob_store.clone(),
        signer,
    )
    .with_notifier(Arc::new(NatsArtifactNotifier::new(
        nats.clone(),
        args.event_subject.clone(),
    )));

    let issuer = Arc::new(
        OtpIssuer::new(
            repository,
            Arc::new(NatsCodeDispatcher::new(nats.clone(), args.otp_subject.clone())),
        )
        .with_call_timeout(args.request_timeout()),
    );
    let consumer = Arc::new(TaskConsumer::new(
        TaskConsumerConfig {
            stream: args.task_stream.clone(),
            subject: args.task_subject.clone(),
            consumer: args.task_consumer.clone(),
            max_deliver: args.max_task_deliveries,
        },
        nats.jetstream(),
        issuer,
    ));

    let consumer_task = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move {
            if let Err(e) = consumer.run().await {
                error!("Task consumer exited: {}", e);
            }
        })
    };

    let state = Arc::new(AppState::new(
        args.node_id,
        Arc::new(orchestrator),
        blob_store,
    ));

    tokio::select! {
        result = server::run(state, args.listen) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    consumer.stop().await;
    if tokio::time::timeout(std::time::Duration::from_secs(10), consumer_task)
        .await
        .is_err()
    {
        warn!("Task consumer did not stop in time");
    }

    info!("Cosigner stopped");
    Ok(())
}
