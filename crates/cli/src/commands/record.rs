//! Record Command

use anyhow::Result;
use clap::Args;
use testdeck_common::HarnessConfig;
use testdeck_harness::recorder::{start_recorder, RecorderOptions};

use crate::output::{print_success, OutputFormat};

#[derive(Args)]
pub struct RecordArgs {
    /// Page to open in the recorder
    pub url: String,

    /// File the recorded test is written to
    #[arg(long)]
    pub output_file: Option<String>,

    /// Language of the generated test
    #[arg(long)]
    pub target: Option<String>,

    /// Device to emulate
    #[arg(long)]
    pub device: Option<String>,
}

pub async fn execute(args: RecordArgs, config: HarnessConfig, format: OutputFormat) -> Result<()> {
    let options = RecorderOptions {
        url: Some(args.url),
        output_file: args.output_file,
        target: args.target,
        device: args.device,
        ..Default::default()
    };
    let handle = start_recorder(&config.engine, &options)?;

    match format {
        OutputFormat::Table => {
            print_success(&format!(
                "Recorder {} started (pid: {})",
                handle.id,
                handle
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ));
            println!("  {}", handle.command);
        }
        _ => println!("{}", serde_json::to_string_pretty(&handle)?),
    }
    Ok(())
}
