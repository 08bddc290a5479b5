use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Start => {
            commands::start::execute(&args).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args)?,
        },
        cli::Commands::Version => {
            println!("visit-counter v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
