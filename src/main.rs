use drawroom::{app, AppState, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "drawroom listening");

    axum::serve(listener, app(AppState::new(config))).await?;
    Ok(())
}
