//! Serve Command

use anyhow::Result;
use clap::Args;
use testdeck_common::HarnessConfig;
use tracing::info;

#[derive(Args)]
pub struct ServeArgs {
    /// Bind address (overrides `listen` from the config file)
    #[arg(long)]
    pub listen: Option<String>,
}

pub async fn execute(args: ServeArgs, mut config: HarnessConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    info!(
        "Serving on http://{} (reports: {})",
        config.listen,
        config.paths.reports_dir.display()
    );
    testdeck_web::serve(config).await
}
