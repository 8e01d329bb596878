use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "learnhub")]
#[command(about = "LearnHub node with a read-through, write-invalidated cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (overrides LEARNHUB_CONFIG, default learnhub.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until ctrl-c
    Serve(ServeArgs),
    /// Print the TTL a cache key resolves to
    Ttl(TtlArgs),
    /// Remove matching keys everywhere and tell every instance
    Invalidate(InvalidateArgs),
    /// Print invalidation messages as they are broadcast
    Watch,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Start with an empty store instead of the demo catalog
    #[arg(long)]
    pub no_seed: bool,
    /// Seconds between cache statistics log lines
    #[arg(long, default_value_t = 60)]
    pub stats_interval_secs: u64,
}

#[derive(Args)]
pub struct TtlArgs {
    /// Cache key, e.g. courses:list:1:20:_:_
    pub key: String,
}

#[derive(Args)]
pub struct InvalidateArgs {
    /// Exact key or prefix pattern ending in `*`, e.g. courses:list:*
    pub pattern: String,
    /// Correlation id carried on the broadcast message
    #[arg(long)]
    pub correlation_id: Option<String>,
}
