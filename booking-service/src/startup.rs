//! Application startup and lifecycle management.

use crate::config::BookingServiceConfig;
use crate::handlers::{bookings, health, notifications, wallet};
use crate::middleware::http_metrics_middleware;
use crate::services::{BookingEngine, NotificationDispatcher, WalletService};
use crate::store::{
    BookingStore, Database, LedgerStore, MemoryBookingStore, MemoryLedgerStore,
    MemoryNotificationStore, NotificationStore,
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BookingServiceConfig,
    pub engine: Arc<BookingEngine>,
    pub wallet: Arc<WalletService>,
    pub notifications: Arc<NotificationDispatcher>,
    pub database: Option<Database>,
}

impl AppState {
    /// Wire the services over the given stores.
    pub fn new(
        config: BookingServiceConfig,
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn LedgerStore>,
        notification_store: Arc<dyn NotificationStore>,
        database: Option<Database>,
    ) -> Self {
        let wallet = Arc::new(WalletService::new(
            ledger,
            config.wallet.commission_rate,
            config.wallet.platform_account_id.clone(),
        ));
        tracing::info!(
            commission_rate = %wallet.commission_rate(),
            platform_account = wallet.platform_account_id(),
            "Wallet configured"
        );
        let notifications = Arc::new(NotificationDispatcher::new(notification_store));

        let mut engine = BookingEngine::new(bookings, wallet.clone());
        engine.add_observer(notifications.clone());

        Self {
            config,
            engine: Arc::new(engine),
            wallet,
            notifications,
            database,
        }
    }

    /// State over fresh in-memory stores.
    pub fn in_memory(config: BookingServiceConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryBookingStore::new()),
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryNotificationStore::new()),
            None,
        )
    }

    /// State over PostgreSQL, running migrations first.
    pub async fn postgres(config: BookingServiceConfig, database: Database) -> Result<Self, AppError> {
        database.run_migrations().await?;
        let shared = Arc::new(database.clone());
        Ok(Self::new(
            config,
            shared.clone(),
            shared.clone(),
            shared,
            Some(database),
        ))
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/accept", put(bookings::accept_booking))
        .route("/bookings/:id/cancel", put(bookings::cancel_booking))
        .route("/bookings/:id/reschedule", post(bookings::request_reschedule))
        .route(
            "/bookings/:id/reschedule/approve",
            put(bookings::approve_reschedule),
        )
        .route(
            "/bookings/:id/reschedule/reject",
            put(bookings::reject_reschedule),
        )
        .route(
            "/bookings/provider/:provider_id",
            get(bookings::list_provider_bookings),
        )
        .route(
            "/bookings/provider/:provider_id/upcoming",
            get(bookings::provider_upcoming),
        )
        .route(
            "/bookings/provider/:provider_id/recent",
            get(bookings::provider_recent),
        )
        .route(
            "/bookings/requester/:requester_id",
            get(bookings::list_requester_bookings),
        )
        .route("/wallet/topup", post(wallet::top_up))
        .route("/wallet/deduct", post(wallet::deduct))
        .route(
            "/wallet/transactions/:account_id",
            get(wallet::transactions),
        )
        .route("/wallet/:account_id", get(wallet::get_balance))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/notifications/:id/read", put(notifications::mark_as_read))
        .route(
            "/notifications/stream/:user_id",
            get(notifications::stream),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_endpoint))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BookingServiceConfig) -> Result<Self, AppError> {
        let state = match &config.database {
            Some(db_config) => {
                let database = Database::new(
                    &db_config.url,
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await?;
                AppState::postgres(config.clone(), database).await?
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                AppState::in_memory(config.clone())
            }
        };

        let app = build_router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!("HTTP server listening on port {}", http_port);

        let server = axum::serve(listener, app);

        Ok(Self {
            http_port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
