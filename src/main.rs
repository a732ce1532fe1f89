use anyhow::Result;
use solar_yield_engine::{config, controller, telemetry};
use config::Config;
use telemetry::{init_tracing, LogFormat};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments usually set SOLAR__* in the unit file
    let dotenv = dotenvy::dotenv();

    init_tracing(LogFormat::from_env());

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let cfg = Config::load()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %cfg.store.path.display(),
        model = %cfg.model.artifact_path.display(),
        latitude = cfg.site.latitude,
        longitude = cfg.site.longitude,
        "starting solar yield engine"
    );

    let mut engine = controller::bootstrap(&cfg).await?;
    let result = engine.run(telemetry::shutdown_signal()).await;

    engine.repositories().database().close().await;
    info!("shutdown complete");
    result
}
