use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONCURRENCY;

#[derive(Debug, Parser)]
#[command(
    name = "jnctrack",
    version,
    about = "Track J-Novel Club series and keep them in sync with your follows"
)]
pub struct Cli {
    /// Directory holding tracked.json [default: ~/.jncep]
    #[arg(long, global = true, value_name = "DIR", env = "JNCTRACK_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// J-Novel Club API token
    #[arg(long, global = true, env = "JNCTRACK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Maximum number of concurrent API requests
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage tracked series
    #[command(subcommand)]
    Track(TrackCommand),
}

#[derive(Debug, Subcommand)]
pub enum TrackCommand {
    /// Start tracking a series from its latest part
    Add {
        url: String,
        /// Do not follow the series on J-Novel Club
        #[arg(long)]
        no_follow: bool,
    },
    /// Stop tracking a series
    Rm { url: String },
    /// Show tracked series
    List,
    /// Reconcile tracked series with the J-Novel Club follow list
    Sync {
        #[arg(long, value_enum, default_value_t = SyncDirection::Forward)]
        direction: SyncDirection,
        /// Also remove entries missing on the source side
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncDirection {
    /// Follows to tracked series
    Forward,
    /// Tracked series to follows
    Backward,
    /// Forward, then backward
    Both,
}
