//! Command-line and configuration file handling

mod args;
mod config;

pub use args::{Args, Command};
pub use config::{ConfigError, FanoutConfig, LoggingSection, ServerSection};
