//! CLI command definitions

use clap::Args;

/// Validate an integration configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the configuration YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
