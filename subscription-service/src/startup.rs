//! Application startup and lifecycle management.

use crate::config::SubscriptionConfig;
use crate::handlers::{health, payments, renewals, subscriptions};
use crate::services::{
    init_metrics, spawn_renewal_scheduler, Database, PgStore, RenewalBatchDriver,
    SubscriptionManager,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub renewals: RenewalBatchDriver,
    pub renewal_window: chrono::Duration,
    pub service_name: String,
}

impl AppState {
    pub fn new(manager: SubscriptionManager, config: &SubscriptionConfig) -> Self {
        let manager = Arc::new(manager);
        Self {
            renewals: RenewalBatchDriver::new(manager.clone()),
            manager,
            renewal_window: config.renewal.window(),
            service_name: config.service_name.clone(),
        }
    }
}

/// Build the HTTP router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions/:id", get(subscriptions::get_subscription))
        .route(
            "/subscriptions/:id/renew",
            post(subscriptions::renew_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/upgrade",
            post(subscriptions::upgrade_subscription),
        )
        .route("/payments/:id/refund", post(payments::refund_payment))
        .route("/renewals/run", post(renewals::run_renewals))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    scheduler_interval: Option<std::time::Duration>,
}

impl Application {
    /// Connect to PostgreSQL, run migrations and bind the listener.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        let db = Database::connect(&config.database).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let manager = SubscriptionManager::new(Arc::new(PgStore::new(db)));
        let state = AppState::new(manager, &config);
        Self::build_with_state(config, state).await
    }

    /// Bind the listener over prebuilt state. Tests use this with the
    /// in-memory store.
    pub async fn build_with_state(
        config: SubscriptionConfig,
        state: AppState,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = config.common.http_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Subscription service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
            scheduler_interval: config.renewal.scheduler_interval(),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until the process is killed.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests and
    /// stop the renewal scheduler.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scheduler = self.scheduler_interval.map(|interval| {
            spawn_renewal_scheduler(
                self.state.renewals.clone(),
                interval,
                self.state.renewal_window,
            )
        });

        tracing::info!(
            service = %self.state.service_name,
            http_port = self.http_port,
            scheduler = scheduler.is_some(),
            "Accepting subscription requests"
        );

        let result = axum::serve(self.http_listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(handle) = scheduler {
            handle.abort();
            tracing::info!("Renewal scheduler stopped");
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
