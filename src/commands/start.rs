use anyhow::Result;
use colored::Colorize;
use tracing::info;
use visit_counter::{config, init_tracing, server};

use crate::cli::Cli;

/// Execute the start command
///
/// Loads configuration, initializes logging and runs the server until it
/// has shut down.
pub async fn execute(cli: &Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref(), &cli.config_overrides())?;
    init_tracing(&cfg.logging);

    println!("{}", "Starting visit counter...".green());
    info!(
        listen_addr = %cfg.server.listen_addr,
        persistence = cfg.store.enabled,
        strict = cfg.server.strict,
        "Starting visit counter v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Blocks until shutdown
    server::start_server(cfg).await?;

    Ok(())
}
