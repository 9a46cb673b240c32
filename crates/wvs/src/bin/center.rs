use tracing_subscriber::EnvFilter;
use wvs::{CenterConfig, CenterServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "center.json".to_string());
    let config = CenterConfig::load(&path)?;
    tracing::info!(config = %path, bind = %config.bind, world = %config.world.name, "starting center");

    let server = CenterServer::builder(config).build().await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
