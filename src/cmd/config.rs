//! Configuration view and validation commands (`transit config`).

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::ConfigCommands;
use transit::config::{CONFIG_DIR, CONFIG_FILE, IndicatorConfig, TransitConfig, TransitToml};

fn print_indicator(indicator: &IndicatorConfig) {
    println!("  delay_ms = {}", indicator.delay_ms);
    println!("  color = \"{}\"", indicator.color);
    println!("  show_spinner = {}", indicator.show_spinner);
    println!("  upload_cap = {}", indicator.upload_cap);
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", style("Transit Configuration").bold());
            println!("=====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                TransitToml::load(&config_path)?
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
                TransitToml::default()
            };
            println!();

            println!("[indicator]");
            print_indicator(&toml.indicator);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  json = {}", toml.logging.json);
            println!();

            println!("Effective values (with env overrides):");
            let config = TransitConfig::new(project_dir)?;
            print_indicator(&config.indicator());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = TransitToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create {}", config_dir.display()))?;

            TransitToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [indicator] delay_ms, color, show_spinner, upload_cap");
            println!("  - [logging] level, json");
            println!();
        }
    }

    Ok(())
}
