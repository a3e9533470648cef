use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use log::warn;
use runman_track::{MetricManager, MultiTargetTracker};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(long, env = "RUNMAN_CONFIG")]
    pub config: PathBuf,
    #[arg(long, env = "RUNMAN_PARAMETERS")]
    pub parameters: PathBuf,
}

pub fn run(args: &ValidateArgs) -> Result<(), Box<dyn Error>> {
    let report =
        runman_exp::validate::<MultiTargetTracker, MetricManager>(&args.config, &args.parameters)?;
    for issue in &report.invalid_paths {
        warn!("{}: {}", issue.path, issue.reason);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
