//! Command-line configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use mesh::MeshConfig;
use tracing::Level;

use crate::commands::Command;

/// Exercise linkweave local nodes.
#[derive(Parser, Debug)]
#[command(name = "linkweave", version, about)]
pub struct CliConfig {
    /// JSON file with node settings; defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn run(&self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level())
            .with_target(false)
            .init();

        let mesh = self.mesh_config()?;
        let result = self.command.execute(&mesh)?;
        println!("{result}");
        Ok(())
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// Node settings from `--config`, or the defaults.
    pub fn mesh_config(&self) -> anyhow::Result<MeshConfig> {
        match &self.config {
            Some(path) => load(path),
            None => Ok(MeshConfig::default()),
        }
    }
}

fn load(path: &Path) -> anyhow::Result<MeshConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    MeshConfig::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}
