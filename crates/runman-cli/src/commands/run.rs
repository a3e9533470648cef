use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use runman_exp::{RunOpts, SweepRequest};
use runman_track::{MetricManager, MultiTargetTracker};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML document with the tracker and optional ground truth and metric manager.
    #[arg(long, env = "RUNMAN_CONFIG")]
    pub config: PathBuf,
    /// JSON parameter document describing the sweep.
    #[arg(long, env = "RUNMAN_PARAMETERS")]
    pub parameters: PathBuf,
    /// Ground-truth setting; accepted for compatibility and only logged.
    #[arg(long, env = "RUNMAN_GROUNDTRUTH_SETTING")]
    pub groundtruth_setting: Option<u64>,
    /// Directory receiving the timestamped sweep root.
    #[arg(long, env = "RUNMAN_OUT", default_value = ".")]
    pub out: PathBuf,
    /// Worker threads; 0 uses every available core.
    #[arg(long, env = "RUNMAN_WORKERS", default_value_t = 0)]
    pub workers: usize,
    /// Abort when a parameter path does not resolve instead of failing its runs.
    #[arg(long)]
    pub strict_paths: bool,
    /// Prefix of the sweep root directory name.
    #[arg(long, default_value = "metrics")]
    pub dir_prefix: String,
    /// Append-mode log file receiving one line per run.
    #[arg(long, env = "RUNMAN_LOG", default_value = "simulation.log")]
    pub log: PathBuf,
    /// Echo per-run progress on the terminal as well.
    #[arg(long, short)]
    pub verbose: bool,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let request = SweepRequest {
        config: args.config.clone(),
        parameters: args.parameters.clone(),
        out: args.out.clone(),
        opts: RunOpts {
            workers: args.workers,
            strict_paths: args.strict_paths,
            dir_prefix: args.dir_prefix.clone(),
            groundtruth_setting: args.groundtruth_setting,
        },
    };
    let report = runman_exp::run::<MultiTargetTracker, MetricManager>(&request)?;
    println!(
        "{}/{} runs succeeded, results in {}",
        report.succeeded,
        report.total_runs,
        report.root.display()
    );
    Ok(())
}
