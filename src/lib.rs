/// The current version of the relay, sourced from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod commands;
pub mod config;
pub mod relay;
pub mod server;
