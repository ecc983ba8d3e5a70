mod backlog;
mod config;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::RelayConfig::from_env();
    let state = state::AppState::new(config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(
        port = config.port,
        backlog_capacity = config.backlog_capacity,
        backlog_retention_secs = config.backlog_retention.as_secs(),
        "chatrelay listening"
    );
    axum::serve(listener, app).await.expect("server failed");
}
