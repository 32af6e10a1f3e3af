//! PPE compliance monitor binary.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use safeguard_monitor::{metrics, MonitorApp, MonitorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("safeguard=info".parse()?)
        .add_directive("ort=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting safeguard-monitor");

    let config = MonitorConfig::from_env().context("Invalid configuration")?;
    info!("Monitor config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(addr = %addr, "Prometheus exporter listening");
    }

    let mut app = MonitorApp::build(config.clone())
        .await
        .context("Failed to initialize monitor")?;

    let started = app.start_configured_cameras();
    if started == 0 {
        warn!("No cameras started; set SAFEGUARD_CAMERAS=cam01=/path/video.mp4,...");
    } else {
        info!(cameras = started, "Cameras started");
    }
    app.spawn_sweeper();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    app.shutdown().await;
    info!("Monitor shutdown complete");
    Ok(())
}
