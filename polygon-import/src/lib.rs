pub mod cli;
pub mod client;
pub mod load_config;
pub mod package;

pub use cli::{execute, run, Cli, Commands};
