use crowd_heatmap::config::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crowd_heatmap=info")),
        )
        .init();

    let config = Config::from_env();
    if config.admin_secret == Config::default().admin_secret {
        warn!("ADMIN_SECRET is not set; control messages accept the default secret");
    }
    info!(
        grid_w = config.grid.w,
        grid_h = config.grid.h,
        snapshot_fps = config.snapshot_fps,
        rate_limit = config.rate_limit_enabled,
        "Starting crowd-heatmap"
    );

    crowd_heatmap::run(config).await?;
    Ok(())
}
