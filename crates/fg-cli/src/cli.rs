use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fg",
    about = "feedgraph: signed, content-addressed object feeds",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print a fresh feed key pair
    Keygen,
    /// Start a node and run the demo write loop
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Node configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Milliseconds between ticks; overrides the config file
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Stop after this many ticks
    #[arg(long)]
    pub ticks: Option<u64>,
    /// Store blobs under this directory instead of in memory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Hex secret key of the feed to write; a fresh one is generated if omitted
    #[arg(long)]
    pub key: Option<String>,
}
