use tracing::info;

use testdeck_common::{default_config_path, HarnessConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var("TESTDECK_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = HarnessConfig::load(&config_path)?.apply_env()?;
    config.validate()?;

    info!(
        "Starting Testdeck on http://{} (engine: {})",
        config.listen, config.engine.program
    );

    testdeck_web::serve(config).await
}
