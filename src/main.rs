use daily_luck::api::router;
use daily_luck::build_dispatcher;
use daily_luck::config::config;
use daily_luck::db::init_db;
use daily_luck::state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let conf = config()?;
    tracing::info!(port = conf.port, db_path = %conf.db_path, mode = ?conf.mode, "Starting daily luck service");

    let pool = init_db(&conf.db_path).await?;

    let state = AppState {
        dispatcher: Arc::new(build_dispatcher(pool, conf)),
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{}", conf.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server bound");

    axum::serve(listener, app).await?;

    Ok(())
}
