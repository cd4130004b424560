//! # Bus Configuration Validator
//!
//! Command-line tool for validating integration bus configuration across
//! environments before starting the bus.

use clap::{Parser, Subcommand};
use integration_bus::config::{BusConfig, ConfigManager};
use integration_bus::constants::DEFAULT_CONFIG_DIRECTORY;
use integration_bus::registry::TransformRegistry;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bus-config-validator")]
#[command(about = "Validate integration bus configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the full configuration (default)
    All,

    /// Validate one section: dispatcher, delivery, health, storage, modules, rules, transforms
    Component { name: String },

    /// List environments that have an overlay file
    Environments,

    /// Print the effective configuration with secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>, Box<dyn std::error::Error>> {
    match ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment) {
        Ok(manager) => {
            println!("✅ Configuration loaded and validated");
            Ok(manager)
        }
        Err(e) => {
            println!("❌ Failed to load configuration: {e}");
            Err(e.into())
        }
    }
}

fn validate_all(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Integration Bus Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(dir) = &cli.config_dir {
        println!("Config Directory: {}", dir.display());
    }
    println!();

    let manager = load(cli)?;
    let config = manager.config();
    for section in ["dispatcher", "delivery", "health", "storage", "modules", "rules", "transforms"] {
        validate_section(config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Component: {name}");
    let manager = load(cli)?;
    validate_section(manager.config(), &name.to_lowercase())?;
    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn validate_section(config: &BusConfig, section: &str) -> Result<(), Box<dyn std::error::Error>> {
    match section {
        "dispatcher" => {
            let d = &config.dispatcher;
            println!(
                "  dispatcher: max_retries={} backoff={}ms..{}ms",
                d.max_retries, d.base_backoff_ms, d.max_backoff_ms
            );
        }
        "delivery" => {
            let d = &config.delivery;
            println!(
                "  delivery: mode={:?} timeout={}ms path={} probe={}",
                d.mode, d.timeout_ms, d.delivery_path, d.probe_path
            );
        }
        "health" => {
            let h = &config.health;
            println!(
                "  health: enabled={} every {}s, offline after {} failures, alpha={}",
                h.enabled, h.interval_seconds, h.failure_threshold, h.smoothing_factor
            );
        }
        "storage" => {
            println!("  storage: backend={:?}", config.storage.backend);
        }
        "modules" => {
            for module in &config.modules {
                module.validate()?;
                println!("  module {} -> {}", module.module_id, module.address);
            }
            println!("  {} module(s) seeded", config.modules.len());
        }
        "rules" => {
            for rule in &config.rules {
                rule.validate()?;
                let known = config
                    .modules
                    .iter()
                    .any(|module| module.module_id == rule.source_id);
                if !known {
                    println!(
                        "  ⚠️  rule {} has source '{}' not seeded by this config",
                        rule.id, rule.source_id
                    );
                }
            }
            println!("  {} rule(s) seeded", config.rules.len());
        }
        "transforms" => {
            let registry = TransformRegistry::with_builtins();
            for definition in &config.transforms {
                registry.register_definition(definition)?;
            }
            println!("  transforms available: {}", registry.names().join(", "));
        }
        other => return Err(format!("Unknown component: {other}").into()),
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("📋 Available Environments:");
    let dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIRECTORY));
    if !dir.exists() {
        println!("❌ Configuration directory not found: {}", dir.display());
        return Ok(());
    }

    let mut environments: Vec<String> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| {
            name.strip_prefix("bus.")
                .and_then(|rest| rest.strip_suffix(".yaml").or_else(|| rest.strip_suffix(".yml")))
                .map(str::to_string)
        })
        .collect();
    environments.sort();

    if environments.is_empty() {
        println!("  (base configuration only)");
    }
    for environment in environments {
        println!("  • {environment}");
    }
    Ok(())
}

fn show_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}
