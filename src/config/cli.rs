use crate::app::RunOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "cms-monit-match")]
#[command(about = "Match CMS monitoring records across MONIT data sources")]
pub struct CliArgs {
    /// Path to the INI configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Query the last N seconds instead of the configured gte/lte range
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Write matched records to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Log level for this tool (error, warn, info, debug, trace)
    #[arg(
        long,
        default_value = "warn",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Dry run - show the requests without sending them
    #[arg(long)]
    pub dry_run: bool,
}

impl From<&CliArgs> for RunOptions {
    fn from(args: &CliArgs) -> Self {
        Self {
            config: args.config.clone(),
            interval: args.interval.map(Duration::from_secs),
            output: args.output.clone(),
            dry_run: args.dry_run,
        }
    }
}
