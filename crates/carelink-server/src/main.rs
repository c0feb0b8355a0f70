use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use carelink_api::auth::{AppState, AppStateInner};
use carelink_api::middleware::RateLimiter;
use carelink_api::revenue::KeywordCatalog;
use carelink_gateway::Dispatcher;
use carelink_notify::{Notifier, SearchIndex};
use carelink_server::{Config, build_router, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carelink=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.admin_token.is_empty() {
        info!("CARELINK_ADMIN_TOKEN unset, admin endpoints disabled");
    }

    let db = Arc::new(carelink_db::Database::open(&config.db_path)?);

    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        admin_token: config.admin_token.clone(),
        dispatcher: dispatcher.clone(),
        search: SearchIndex::new(config.search_url.clone()),
        notifier: Notifier::new(
            config.email_webhook.clone(),
            config.sms_webhook.clone(),
            config.whatsapp_webhook.clone(),
        ),
        extractor: Arc::new(KeywordCatalog::default()),
    });

    worker::spawn(db, app_state.notifier.clone(), config.worker_interval);

    let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window));
    let app = build_router(app_state, limiter);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Carelink server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
