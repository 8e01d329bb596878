//! Log output of the `learnhub` binary.
//!
//! The LearnHub crates log at the configured level. Everything else (redis,
//! deadpool, tokio) is held at `warn` so cache traffic at `debug` stays
//! readable. `RUST_LOG`, when set, replaces the whole filter.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

const LEARNHUB_CRATES: [&str; 3] = ["learnhub_server", "learnhub_app", "learnhub_cache"];

/// `EnvFilter` directives for a configured level.
pub fn filter_directives(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    if level == "off" {
        return level;
    }
    let others = if level == "error" { "error" } else { "warn" };
    std::iter::once(others.to_string())
        .chain(LEARNHUB_CRATES.iter().map(|krate| format!("{krate}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// command output (`ttl`, `watch`).
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Full => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = installed {
        eprintln!("Warning: tracing already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_stay_at_warn() {
        assert_eq!(
            filter_directives("DEBUG"),
            "warn,learnhub_server=debug,learnhub_app=debug,learnhub_cache=debug"
        );
    }

    #[test]
    fn test_quiet_levels() {
        assert_eq!(filter_directives("off"), "off");
        assert!(filter_directives("error").starts_with("error,"));
    }

    #[test]
    fn test_every_accepted_level_builds_a_filter() {
        for level in ["trace", "debug", "info", "warn", "error", "off"] {
            assert!(EnvFilter::try_new(filter_directives(level)).is_ok(), "{level}");
        }
    }
}
