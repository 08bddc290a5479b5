use anyhow::Result;
use colored::Colorize;
use visit_counter::config::{self, Config};
use visit_counter::store::mongo::redact_uri;

use crate::cli::Cli;

/// Execute the config show command
///
/// Displays the effective configuration with store credentials masked
pub fn show(cli: &Cli) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let mut cfg = config::load_config(cli.config.as_deref(), &cli.config_overrides())?;
    cfg.store.uri = redact_uri(&cfg.store.uri);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&cfg)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
pub fn validate(cli: &Cli) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config(cli.config.as_deref(), &cli.config_overrides())?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    print_summary(&cfg);

    Ok(())
}

fn print_summary(cfg: &Config) {
    println!("{}", "Summary:".bold());
    println!("  {}: {}", "Listen".cyan(), cfg.server.listen_addr);
    println!("  {}: {}s", "Request Timeout".cyan(), cfg.server.request_timeout_secs);
    println!("  {}: {}s", "Drain Timeout".cyan(), cfg.server.drain_timeout_secs);
    let persistence = if cfg.store.enabled {
        "enabled".green()
    } else {
        "disabled".red()
    };
    println!("  {}: {}", "Persistence".cyan(), persistence);
    if cfg.store.enabled {
        println!(
            "    {:?} {} → {}.{}/{}",
            cfg.store.backend,
            redact_uri(&cfg.store.uri),
            cfg.store.database,
            cfg.store.collection,
            cfg.store.document_id
        );
    }
    println!("  {}: {}", "Service Name".cyan(), cfg.tracing.service_name);
}
