use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    about = "Keel: adaptive resource and state management core",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a usage sequence through a fully wired monitor
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Usage percentages, one per sample
    #[arg(long, value_delimiter = ',', default_value = "40,72,88,97")]
    pub usage: Vec<f64>,

    /// Entries preloaded into the demo cache namespace
    #[arg(long, default_value_t = 40)]
    pub entries: usize,

    /// Load configuration from a TOML file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// TOML file to merge over the defaults
    #[arg(long)]
    pub file: Option<PathBuf>,
}
