use financial_report_pipeline::{
    api::{start_server, ApiState},
    config::AppConfig,
    state::InMemoryRunStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    info!("Financial Report Pipeline - API Server");
    info!("Port: {}", config.port);

    let pipeline = config.build_pipeline()?;

    if !pipeline.client.validate_credential().await {
        info!("Model credential not accepted yet; report runs will fail until it is");
    }

    let state = ApiState::new(
        pipeline.orchestrator,
        pipeline.client,
        Arc::new(InMemoryRunStore::new()),
        config.preferences,
    );

    // Start API server
    start_server(state, config.port).await?;

    Ok(())
}
