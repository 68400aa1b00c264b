//! Patchwork command-line tool
//!
//! Edits the persisted plugin state (install, enable, refetch, ...) outside
//! of a running host session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use patchwork::core::{CliArgs, Command, Config, LogNotifier, Logger};
use patchwork::plugin::{
    FactoryEvaluator, HttpPluginSource, JsonFileStore, PluginInfo, PluginManager, PluginServices,
};
use patchwork::HostContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = match Config::load(&cli_args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!(
        store = %config.plugins.store_path.display(),
        version = patchwork::VERSION,
        "Patchwork starting"
    );

    let store = JsonFileStore::open(&config.plugins.store_path)
        .with_context(|| format!("Failed to open store {}", config.plugins.store_path.display()))?;
    let source = HttpPluginSource::new(Duration::from_secs(config.plugins.fetch_timeout))?;

    let manager = PluginManager::new(
        HostContext::new(),
        PluginServices {
            source: Arc::new(source),
            store: Arc::new(store),
            evaluator: Arc::new(FactoryEvaluator::new()),
            notifier: Arc::new(LogNotifier),
        },
    )
    .with_refetch_on_init(config.plugins.refetch_on_init);
    manager.load()?;

    match cli_args.command {
        Command::List { json } => {
            let plugins = manager.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&plugins)?);
            } else {
                print_table(&plugins);
            }
        }
        Command::Install { id, enable } => {
            let plugin = manager.install(&id).await?;
            if enable {
                manager.set_enabled(&id, true)?;
            }
            println!("Installed {} {} ({})", plugin.name, plugin.version, plugin.id);
        }
        Command::Remove { id } => {
            manager.remove(&id)?;
            println!("Removed {}", id);
        }
        Command::Enable { id } => {
            manager.set_enabled(&id, true)?;
            println!("Enabled {}", id);
        }
        Command::Disable { id } => {
            manager.set_enabled(&id, false)?;
            println!("Disabled {}", id);
        }
        Command::Refetch { id } => {
            manager.refetch_source(&id).await?;
            println!("Refetched {}", id);
        }
        Command::ToggleUpdate { id } => {
            let update = manager.toggle_update(&id)?;
            println!(
                "{} will {}be refetched on session start",
                id,
                if update { "" } else { "not " }
            );
        }
        Command::ClearData { id } => {
            manager.clear_data(&id)?;
            println!("Cleared data for {}", id);
        }
    }

    Ok(())
}

fn print_table(plugins: &[PluginInfo]) {
    if plugins.is_empty() {
        println!("No plugins installed");
        return;
    }
    let name_width = plugins.iter().map(|p| p.name.len()).max().unwrap_or(4).max(4);
    println!("{:<name_width$}  {:<9}  {:<8}  {:<6}  ID", "NAME", "VERSION", "ENABLED", "UPDATE");
    for plugin in plugins {
        println!(
            "{:<name_width$}  {:<9}  {:<8}  {:<6}  {}",
            plugin.name,
            plugin.version,
            if plugin.enabled { "yes" } else { "no" },
            if plugin.update { "yes" } else { "no" },
            plugin.id,
        );
    }
}
