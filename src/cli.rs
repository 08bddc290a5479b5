use clap::{Parser, Subcommand};
use std::path::PathBuf;

use visit_counter::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "visit-counter", version, about = "Visit counter web service")]
pub struct Cli {
    /// Configuration file path (defaults to ./visit-counter.{toml,yaml,json} if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Command-line overrides; these win over the config file and environment.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Address to listen on, e.g. 0.0.0.0:8080
    #[arg(long, global = true)]
    pub listen_addr: Option<String>,

    /// Per-request deadline in seconds
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,

    /// Maximum time to wait for in-flight requests on shutdown, in seconds
    #[arg(long, global = true)]
    pub drain_timeout: Option<u64>,

    /// Time a client gets to send request headers, in seconds
    #[arg(long, global = true)]
    pub read_timeout: Option<u64>,

    /// Close keep-alive connections idle for this long, in seconds
    #[arg(long, global = true)]
    pub idle_timeout: Option<u64>,

    /// HTML template for the landing page
    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    /// Stop the process when a request fails
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    pub strict: Option<bool>,

    /// Enable the persistent counter
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    pub persistence: Option<bool>,

    /// Counter store backend: mongodb or memory
    #[arg(long, global = true)]
    pub store_backend: Option<String>,

    /// Store connection string
    #[arg(long, global = true)]
    pub store_uri: Option<String>,

    #[arg(long, global = true)]
    pub store_database: Option<String>,

    #[arg(long, global = true)]
    pub store_collection: Option<String>,

    #[arg(long, global = true)]
    pub store_document_id: Option<String>,

    /// Service name attached to reported spans
    #[arg(long, global = true)]
    pub tracing_service_name: Option<String>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format: text or json
    #[arg(long, global = true)]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server (default)
    Start,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration (with credentials masked)
    Show,

    /// Validate configuration
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }

    pub fn config_overrides(&self) -> ConfigOverrides {
        let args = self.overrides.clone();
        ConfigOverrides {
            listen_addr: args.listen_addr,
            request_timeout_secs: args.request_timeout,
            drain_timeout_secs: args.drain_timeout,
            read_timeout_secs: args.read_timeout,
            idle_timeout_secs: args.idle_timeout,
            template_path: args.template,
            strict: args.strict,
            persistence: args.persistence,
            store_backend: args.store_backend,
            store_uri: args.store_uri,
            store_database: args.store_database,
            store_collection: args.store_collection,
            store_document_id: args.store_document_id,
            tracing_service_name: args.tracing_service_name,
            log_level: args.log_level,
            log_format: args.log_format,
        }
    }
}
