use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "openspeed",
    version,
    about = "Terminal client for OpenSpeedTest-compatible speed test servers"
)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run once without the TUI and print the result as JSON on stdout.
    #[arg(long)]
    pub cli: bool,

    /// Stream progress lines to stderr (headless mode only).
    #[arg(short, long)]
    pub verbose: bool,
}
