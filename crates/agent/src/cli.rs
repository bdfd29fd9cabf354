use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::pipeline::WorkerCounts;

#[derive(Debug, Args)]
pub struct Config {
    #[arg(
        long,
        long_help = "Directory where the agent stores downloaded reports and investigation packages",
        env = "SANDGATE_DATA_DIRECTORY",
        default_value_os_t = PathBuf::from("/var/lib/sandgate"),
    )]
    pub data_directory: PathBuf,

    #[arg(
        long,
        long_help = "Unix socket path for local submissions",
        env = "SANDGATE_SUBMIT_SOCKET",
        default_value_os_t = PathBuf::from("/var/run/sandgate/submit.sock"),
    )]
    pub submit_socket: PathBuf,

    #[arg(
        long,
        long_help = "Base URL of the sandbox analysis service",
        env = "SANDGATE_ENDPOINT_URL"
    )]
    pub endpoint_url: String,

    #[arg(
        long,
        long_help = "API key for the sandbox analysis service",
        env = "SANDGATE_API_KEY"
    )]
    pub api_key: String,

    #[arg(
        long,
        long_help = "Seconds between submission status polls",
        env = "SANDGATE_POLL_INTERVAL_SECS",
        default_value_t = 5
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        long_help = "Give up on a submission after this many status polls (0 = never)",
        env = "SANDGATE_MAX_POLL_ATTEMPTS",
        default_value_t = 720
    )]
    pub max_poll_attempts: u32,

    #[arg(
        long,
        long_help = "Filename masks to skip, e.g. '*.tmp,thumbs.db'. Matching is case-insensitive.",
        value_delimiter = ',',
        env = "SANDGATE_IGNORE_MASKS"
    )]
    pub ignore_masks: Vec<String>,

    #[arg(
        long,
        long_help = "Capacity of each pipeline stage queue",
        env = "SANDGATE_CHANNEL_CAPACITY",
        default_value_t = crate::pipeline::DEFAULT_CHANNEL_CAPACITY
    )]
    pub channel_capacity: usize,

    #[arg(
        long,
        long_help = "Workers uploading submissions to the sandbox",
        env = "SANDGATE_UPLOAD_WORKERS",
        default_value_t = 5
    )]
    pub upload_workers: usize,

    #[arg(
        long,
        long_help = "Workers polling submission status",
        env = "SANDGATE_WAIT_WORKERS",
        default_value_t = 5
    )]
    pub wait_workers: usize,

    #[arg(
        long,
        long_help = "Workers fetching analysis results",
        env = "SANDGATE_RESULT_WORKERS",
        default_value_t = 5
    )]
    pub result_workers: usize,

    #[arg(
        long,
        long_help = "Workers downloading reports",
        env = "SANDGATE_REPORT_WORKERS",
        default_value_t = 2
    )]
    pub report_workers: usize,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn worker_counts(&self) -> WorkerCounts {
        WorkerCounts {
            upload: self.upload_workers,
            wait: self.wait_workers,
            result: self.result_workers,
            report: self.report_workers,
            ..WorkerCounts::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the submission agent.
    Run {
        #[command(flatten)]
        config: Config,
    },
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Sandbox analysis submission agent")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut full = vec![
            "sandgate-agent",
            "run",
            "--endpoint-url",
            "https://sandbox.example.com",
            "--api-key",
            "k",
        ];
        full.extend(args);
        let Command::Run { config } = Cli::parse_from(full).subcommand;
        config
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.data_directory, PathBuf::from("/var/lib/sandgate"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_poll_attempts, 720);
        assert!(config.ignore_masks.is_empty());
        assert_eq!(config.channel_capacity, 1000);
    }

    #[test]
    fn test_ignore_masks_are_comma_separated() {
        let config = parse(&["--ignore-masks", "*.tmp,thumbs.db"]);
        assert_eq!(config.ignore_masks, vec!["*.tmp", "thumbs.db"]);
    }

    #[test]
    fn test_worker_counts_flow_into_the_pipeline() {
        let config = parse(&["--wait-workers", "9"]);
        let counts = config.worker_counts();
        assert_eq!(counts.wait, 9);
        assert_eq!(counts.prefilter, 1);
    }
}
