use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::store::StorageManager,
    utils::config::get_config,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let storage = StorageManager::new(&config).await?;

    let api_state = ApiState::new(&config, storage).await?;
    info!(
        embedding_backend = api_state.embedding_provider.backend_label(),
        embedding_dimension = api_state.embedding_provider.dimension(),
        "embedding provider initialized"
    );

    let app = api_routes(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
