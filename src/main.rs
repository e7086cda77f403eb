//! Ledgerpress - content backend for an accounting firm's website

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledgerpress::{
    api::{self, AppState},
    config::Config,
    db::{self, repositories::SqlxSocialPostRepository},
    scheduler::Scheduler,
    services::SocialDispatcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledgerpress=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ledgerpress {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");
    if config.security.secret == Config::default().security.secret {
        tracing::warn!("Using the default security secret; set LEDGERPRESS_SECURITY_SECRET");
    }

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let state = AppState::from_config(pool.clone(), &config)?;

    let dispatcher = SocialDispatcher::from_config(
        SqlxSocialPostRepository::boxed(pool.clone()),
        &config.social,
    )?
    .map(Arc::new);
    Scheduler {
        posts: state.post_service.clone(),
        rss: state.rss_service.clone(),
        users: state.user_service.clone(),
        rate_limiter: state.rate_limiter.clone(),
        social: dispatcher,
        rss_interval: Duration::from_secs(config.rss.refresh_interval_secs),
        social_interval: Duration::from_secs(config.social.dispatch_interval_secs),
    }
    .start();
    tracing::info!("Background jobs started");

    let app = api::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
