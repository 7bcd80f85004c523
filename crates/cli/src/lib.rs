//! CLI tool for exercising linkweave local nodes.
//!
//! Provides commands for:
//! - Simulating two nodes over an in-memory network
//! - Printing the effective node configuration

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult, SimulationReport};
pub use config::CliConfig;
