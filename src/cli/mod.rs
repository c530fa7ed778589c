//! Command-line surface for the agora binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Agora multi-agent space runtime
#[derive(Parser, Debug)]
#[command(name = "agora", version, about = "Run orchestration for multi-agent spaces")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a configuration file and print what it declares
    Check(CheckArgs),
    /// Run a local runtime with an echoing model and chat from stdin
    Demo(DemoArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Path to a TOML configuration file
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Configuration file; the platform default is used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Human entity to post as (defaults to the first configured human)
    #[arg(long = "as")]
    pub human: Option<uuid::Uuid>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
