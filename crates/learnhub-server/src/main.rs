use std::env;

use clap::Parser;
use learnhub_server::cli::{Cli, Commands};
use learnhub_server::commands;
use learnhub_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From LEARNHUB_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (learnhub.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (LEARNHUB_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();

    let (config_path, source) = resolve_config_path(cli.config.as_deref());

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    learnhub_server::observability::init_tracing(&cfg.logging);

    tracing::debug!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    let result = match &cli.command {
        Commands::Serve(args) => commands::serve(&cfg, args).await,
        Commands::Ttl(args) => commands::ttl(&cfg, args),
        Commands::Invalidate(args) => commands::invalidate(&cfg, args).await,
        Commands::Watch => commands::watch(&cfg).await,
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: LEARNHUB_CONFIG
/// 3. Default: learnhub.toml
fn resolve_config_path(cli_path: Option<&str>) -> (String, ConfigSource) {
    if let Some(path) = cli_path {
        return (path.to_string(), ConfigSource::CliArgument);
    }

    if let Ok(path) = env::var("LEARNHUB_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
