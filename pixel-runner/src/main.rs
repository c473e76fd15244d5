use anyhow::Result;
use pixel_api::run as run_api;
use pixel_core::Config;
use pixel_core::PixelContext;
use tokio;
use tracing;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Leadform pixel service");

    // Load configuration
    let config = Config::from_env();
    let ctx = PixelContext::new(config).await?;

    tracing::info!("Pixel context initialized");

    // Admin API (and the dispatcher it carries) runs in the main task
    tracing::info!("Starting API server");
    run_api(ctx).await?;

    Ok(())
}
