//! Command-line arguments
//!
//! Flags given here override the matching values from the configuration
//! file; everything else comes from the file or built-in defaults.

use crate::core::version;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fanout")]
#[command(about = "Topic fanout message broker with visibility leases")]
#[command(version = version::package_version(), long_version = version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Address to listen on (host:port)
    #[arg(short = 'L', long = "listen", value_name = "ADDR", global = true)]
    pub listen: Option<String>,

    /// Log level
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error", "off"]
    )]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(
        short = 'o',
        long = "log-format",
        value_name = "FORMAT",
        global = true,
        value_parser = ["text", "ext", "json"]
    )]
    pub log_format: Option<String>,

    /// Write log output to FILE instead of stderr
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Force coloured log output on or off (default: on for a terminal)
    #[arg(short = 'g', long = "color", value_name = "BOOL", global = true)]
    pub color: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Provision the configured topology and serve clients (default)
    Serve,
    /// Load and provision the configuration in memory, print the topology and exit
    Check,
}

impl Args {
    pub fn selected_command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    /// Whether log output should be coloured
    pub fn use_color(&self) -> bool {
        self.color
            .unwrap_or_else(|| std::io::IsTerminal::is_terminal(&std::io::stderr()))
    }
}
