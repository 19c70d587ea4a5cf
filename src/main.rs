use anyhow::{Context, Result};
use integration_core::cli::commands::ValidateCommand;
use integration_core::cli::output::*;
use integration_core::cli::{Cli, Command};
use integration_core::core::config::IntegrationConfig;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Validate(cmd) => validate_config(cmd)?,
    }

    Ok(())
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating configuration...", INFO);

    let config = match IntegrationConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    println!("{} Configuration is valid!", CHECK);
    println!(
        "  Retry: {} retries, {}ms base delay",
        style(config.retry.max_retries).cyan(),
        config.retry.retry_delay_ms
    );

    println!("  Channels:");
    for line in format_channels(&config.channels) {
        println!("    {}", line);
    }

    println!("  Pipelines: {}", style(config.pipelines.len()).cyan());
    for pipeline in &config.pipelines {
        for line in format_pipeline(pipeline) {
            println!("    {}", line);
        }
    }

    if cmd.json {
        let json = serde_json::to_string_pretty(&config)?;
        println!("\n{}", json);
    }

    Ok(())
}
