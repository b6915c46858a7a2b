//! Subscription Service entry point.

use service_core::observability::init_tracing;
use subscription_service::config::SubscriptionConfig;
use subscription_service::startup::Application;
use tokio::signal;

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires.
async fn wait_for_stop() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("Ctrl+C received"),
        _ = sigterm => tracing::info!("SIGTERM received"),
    }
}

fn startup_error(stage: &str, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(format!("{} failed: {}", stage, e))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = SubscriptionConfig::from_env().map_err(|e| {
        eprintln!("subscription-service: invalid configuration: {}", e);
        startup_error("configuration", e)
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // DATABASE_URL may carry credentials and is not logged.
    tracing::info!(
        service_name = %config.service_name,
        version = %config.service_version,
        http_addr = %config.common.http_addr(),
        db_pool = %format!("{}..{}", config.database.min_connections, config.database.max_connections),
        renewal_window_hours = config.renewal.window_hours,
        renewal_interval_secs = config.renewal.interval_secs,
        otlp = config.otlp_endpoint.is_some(),
        "Starting subscription-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Startup aborted");
        startup_error("startup", e)
    })?;

    app.run_with_shutdown(wait_for_stop()).await?;

    tracing::info!("subscription-service stopped");
    Ok(())
}
