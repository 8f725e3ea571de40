use anyhow::Context;
use askboard_api::{config::Config, cors_layer, db, notifier::Notifier, router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "askboard_api=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::open_pool(&config.database_url, config.db_pool_size)
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    db::run_migrations(&pool).context("failed to run migrations")?;
    tracing::info!(database = %config.database_url, "migrations applied");

    let (notifier, _consumer) = Notifier::spawn(pool.clone(), config.notify_queue_capacity);

    let state = AppState {
        db: pool,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl_days: config.token_ttl_days,
        notifier,
    };
    let app = router(state, cors_layer(&config.cors_origin)?);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("API server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
