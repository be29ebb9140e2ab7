use finance_assistant::{
    api::{start_server, ApiState},
    bootstrap, AppConfig,
};
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

    let config = AppConfig::from_env()?;

    info!("🚀 Finance Assistant - API Server");
    info!("📍 Port: {}", config.port);

    let components = bootstrap::build(&config).await?;

    info!("📡 Starting API server...");
    start_server(
        ApiState {
            assistant: components.assistant,
            probes: components.probes,
        },
        &config.cors_origins,
        config.port,
    )
    .await?;

    Ok(())
}
