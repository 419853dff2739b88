//! Command-line interface for the `archetype` binary.

use std::path::PathBuf;

use clap::Parser;

pub mod commands;
pub mod output;

pub use commands::Commands;
pub use output::OutputMode;

#[derive(Parser, Debug)]
#[command(
    name = "archetype",
    version,
    about = "Apply, stack and revert archetypes on class feature progressions"
)]
pub struct Cli {
    /// Machine-readable JSON output on stdout, JSON logs on stderr
    #[arg(long, global = true, env = "ARCHETYPE_ROBOT")]
    pub robot: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the global and project files
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub const fn output_mode(&self) -> OutputMode {
        if self.robot {
            OutputMode::Robot
        } else {
            OutputMode::Human
        }
    }
}
