use access_service::{
    build_router,
    config::AccessConfig,
    db,
    services::{AccessStore, Database, PgSiteRegistry, SmtpMailer, UserDirectory},
    utils::{Argon2Hasher, Password},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.log_format,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting access service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;

    let store: Arc<dyn AccessStore> = Arc::new(Database::new(pool.clone()));
    let sites = Arc::new(PgSiteRegistry::new(pool));
    let hasher = Arc::new(Argon2Hasher::new());
    let mailer = Arc::new(
        SmtpMailer::new(&config.smtp).map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
    );

    if let Some(bootstrap) = &config.bootstrap {
        let directory = UserDirectory::new(store.clone(), hasher.clone());
        let created = directory
            .ensure_bootstrap_admin(&bootstrap.email, &Password::new(bootstrap.password.clone()))
            .await?;
        tracing::info!(created, "Bootstrap admin checked");
    }

    let state = AppState::new(&config, store, sites, hasher, mailer);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
