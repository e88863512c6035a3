//! # Bulk Engine Configuration Validator
//!
//! Command-line tool for validating `bulk-engine.yaml` across environments
//! before starting the engine.

use anyhow::{bail, Context, Result};
use bulk_engine::config::{ConfigManager, EngineConfig};
use bulk_engine::logging::init_structured_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate bulk engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json, yaml)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the selected environment
    Validate,

    /// Validate every known environment
    All,

    /// Print the fully merged configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    // -v flags only apply when RUST_LOG is not already set
    if cli.verbose > 0 && std::env::var_os("RUST_LOG").is_none() {
        let level = match cli.verbose {
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    init_structured_logging();

    let result = match &cli.command {
        Some(Commands::All) => validate_all(&cli),
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Validate) | None => validate_environment(&cli, &cli.environment).map(|_| ()),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> Result<EngineConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("loading configuration for '{environment}'"))?;
    Ok(manager.config().clone())
}

fn validate_environment(cli: &Cli, environment: &str) -> Result<EngineConfig> {
    let config = load(cli, environment)?;
    println!("✅ {environment}: valid");
    println!(
        "   - bulk: chunk_size={} max_concurrency={} max_sync_records={}",
        config.bulk.chunk_size, config.bulk.max_concurrency, config.bulk.max_sync_records
    );
    println!(
        "   - reconciliation: enabled={} interval={}s batch_size={}",
        config.reconciliation.enabled,
        config.reconciliation.interval_seconds,
        config.reconciliation.batch_size
    );
    Ok(config)
}

fn validate_all(cli: &Cli) -> Result<()> {
    println!("🔧 Validating bulk engine configuration");
    let mut failures = Vec::new();
    for environment in ENVIRONMENTS {
        if let Err(e) = validate_environment(cli, environment) {
            println!("❌ {environment}: {e:#}");
            failures.push(environment);
        }
    }
    if !failures.is_empty() {
        bail!("invalid environments: {}", failures.join(", "));
    }
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let config = load(cli, &cli.environment)?;
    let rendered = match cli.format.as_str() {
        "json" => serde_json::to_string_pretty(&config)?,
        "yaml" => serde_yaml::to_string(&config)?,
        "table" => format!("{config:#?}"),
        other => bail!("unsupported output format '{other}'"),
    };
    println!("{rendered}");
    Ok(())
}
