use sqlx::postgres::PgPoolOptions;
use sso_portal_identity::SessionStore;
use sso_portal_server::{
    auth::{
        AppState, OidcClient,
        db::{PgSessionStore, PgUserDirectory},
    },
    build_router,
    config::ServerConfig,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(debug = config.debug, "Loaded configuration");
    if config.secret_key.is_none() {
        tracing::warn!("DJANGO_SECRET_KEY is not set, sessions will not survive a restart");
    }

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(config.database.connect_options())
        .await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let users = Arc::new(PgUserDirectory::new(db_pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(db_pool));

    // Cleanup expired sessions on startup
    match sessions.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    // Spawn periodic session cleanup task
    let cleanup_sessions = sessions.clone();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup_sessions.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });

    tracing::info!(issuer = %config.oidc.issuer(), "Connecting to OIDC provider...");
    let oidc_client = OidcClient::connect(config.oidc.clone()).await?;

    let app_state = Arc::new(
        AppState::new(
            users,
            sessions,
            oidc_client,
            config.session.clone(),
            config.cookie_key(),
        )
        .with_debug(config.debug)
        .with_allowed_hosts(config.allowed_hosts.clone())
        .with_logout_get(config.allow_logout_get),
    );

    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
