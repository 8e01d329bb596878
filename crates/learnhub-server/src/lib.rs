//! LearnHub node: configuration loading, tracing setup, and the commands
//! behind the `learnhub` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod observability;
pub mod seed;

pub use config::AppConfig;
