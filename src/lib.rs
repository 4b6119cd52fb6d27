pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod locks;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{http::StatusCode, routing::get, Router};
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::locks::{LocalSeatLocks, RedisSeatLocks, SeatLocks};
use crate::services::gateway::{DisabledGateway, PaymentGateway, SnapGatewayClient};
use crate::services::payment::PaymentLedger;
use crate::services::reconcile::{PaymentReconciler, SignaturePolicy};
use crate::services::reservation::ReservationCoordinator;
use crate::services::showtime::ShowtimeScheduler;
use crate::store::{memory::MemoryStore, postgres::PgStore, Store};

// Shared state for the whole application
pub struct AppState {
    pub config: Config,
    pub scheduler: ShowtimeScheduler,
    pub reservations: ReservationCoordinator,
    pub payments: PaymentLedger,
    pub reconciler: PaymentReconciler,
}

impl AppState {
    /// Connects the configured backends: Postgres (or the in-memory store),
    /// Redis seat leases (or in-process ones) and the payment gateway.
    pub async fn new(config: Config) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let store: Arc<dyn Store> = match &config.database.url {
            Some(url) => {
                let db = database::Database::new(url, &config.database).await?;
                db.run_migrations().await?;
                Arc::new(PgStore::new(db.pool))
            }
            None => {
                warn!("DATABASE_URL not set - using the in-memory store");
                Arc::new(MemoryStore::new().with_demo_catalogue().await)
            }
        };

        let locks: Arc<dyn SeatLocks> = match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url).await?;
                Arc::new(RedisSeatLocks::new(
                    redis,
                    config.booking.seat_lock_ttl,
                    config.booking.seat_lock_wait,
                ))
            }
            None => {
                info!("REDIS_URL not set - seat leases are process-local");
                Arc::new(LocalSeatLocks::new(config.booking.seat_lock_wait))
            }
        };

        let gateway: Arc<dyn PaymentGateway> = if config.payment.server_key.is_empty() {
            warn!("PAYMENT_SERVER_KEY not set - orders are created without redirect urls");
            Arc::new(DisabledGateway)
        } else {
            Arc::new(SnapGatewayClient::from_config(&config.payment)?)
        };

        Ok(Self::with_parts(config, store, locks, gateway))
    }

    /// Builds the services on top of already constructed backends.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        locks: Arc<dyn SeatLocks>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Arc<Self> {
        let tx_timeout = config.booking.tx_timeout;
        let signatures = SignaturePolicy {
            server_key: config.payment.server_key.clone(),
            required: config.payment.require_signature,
        };

        Arc::new(Self {
            scheduler: ShowtimeScheduler::new(
                store.clone(),
                config.booking.showtime_boundary,
                tx_timeout,
            ),
            reservations: ReservationCoordinator::new(store.clone(), locks, tx_timeout),
            payments: PaymentLedger::new(store.clone(), gateway, tx_timeout),
            reconciler: PaymentReconciler::new(store, signatures, tx_timeout),
            config,
        })
    }
}

/// The HTTP application: `/health` plus the API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    let request_timeout = state.config.app.request_timeout;
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api/v1", controllers::routes())
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
}
