use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use mfasrv_domain::config::CenterConfig;

/// mfasrv-center — MFA control plane.
#[derive(Debug, Parser)]
#[command(name = "mfasrv-center", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "mfasrv.toml", env = "MFASRV_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control plane (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the config file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<CenterConfig> {
    if !path.is_file() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(CenterConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config: CenterConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(config)
}
