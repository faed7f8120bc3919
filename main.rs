//! X402 Facilitator Server
//!
//! A standalone facilitator server for verifying and settling x402 micropayments
//! on the networks configured through the environment.
//!
//! ## Storage Backends
//!
//! - **In-Memory**: Default storage (data lost on restart)
//! - **Redis**: Persistent storage shared between instances (enable with `redis` feature)

use std::sync::Arc;
use std::time::Duration;

use rust_x402_facilitator::{
    clock::{Clock, SystemClock},
    config::{FacilitatorSettings, StorageSettings},
    facilitator_storage::{InMemoryStorage, NonceStorage},
    server,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "redis")]
use rust_x402_facilitator::facilitator_storage::redis_storage::RedisStorage;

/// How often the in-memory store drops records past their expiry
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = FacilitatorSettings::from_env()?;
    tracing::debug!(?settings, "Loaded settings");

    let storage = open_storage(&settings).await?;
    let facilitator = Arc::new(settings.build_facilitator(storage)?);

    if facilitator.registry().is_empty() {
        tracing::warn!("No network configured; set RPC_URL_<NETWORK> to enable settlement");
    }
    for entry in facilitator.registry().entries() {
        tracing::info!(
            scheme = %entry.scheme,
            network = %entry.network,
            "Offering payment kind"
        );
    }

    let app = server::router(facilitator.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    tracing::info!(
        address = %settings.bind_address,
        "X402 Facilitator listening. Endpoints: POST /verify, POST /settle, GET /supported, GET /health"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Vouchers still waiting in open batches are redeemed before exit
    let redeemed = facilitator.redeem_pending().await;
    tracing::info!(redeemed, "Facilitator stopped");
    Ok(())
}

async fn open_storage(
    settings: &FacilitatorSettings,
) -> std::result::Result<Arc<dyn NonceStorage>, Box<dyn std::error::Error>> {
    match &settings.storage {
        StorageSettings::Memory => {
            tracing::info!("Using in-memory storage");
            let storage = InMemoryStorage::new();
            let purged = storage.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    interval.tick().await;
                    let removed = purged.purge_expired(SystemClock.unix_now()).await;
                    if removed > 0 {
                        tracing::debug!(removed, "Purged expired nonce records");
                    }
                }
            });
            Ok(Arc::new(storage))
        }
        #[cfg(feature = "redis")]
        StorageSettings::Redis { url, key_prefix } => {
            tracing::info!(url = %url, "Using Redis storage");
            let storage = RedisStorage::new(url, key_prefix.as_deref()).await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "redis"))]
        StorageSettings::Redis { .. } => Err(
            "Redis storage requested but the 'redis' feature is not enabled; build with --features redis"
                .into(),
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
