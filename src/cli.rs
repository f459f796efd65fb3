use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "convoy",
    version,
    about = "Service lifecycle supervisor for mixed process/container deployments"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the deployment and supervise it until shutdown
    Up {
        /// Specific services to start, plus their dependencies (all if empty)
        services: Vec<String>,

        /// Override the teardown grace period in seconds
        #[arg(long, env = "CONVOY_GRACE_PERIOD_SECS")]
        grace_period_secs: Option<u64>,

        /// Override the number of pre-flight port wait attempts
        #[arg(long, env = "CONVOY_PORT_WAIT_ATTEMPTS")]
        port_wait_attempts: Option<u32>,
    },
    /// Check the configuration without starting anything
    Validate,
    /// Print the resolved startup order
    Graph {
        #[arg(long, value_enum, default_value = "text")]
        format: GraphFormat,
    },
    /// Generate a starter convoy.toml
    Init,
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Json,
}
