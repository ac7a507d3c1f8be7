use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use mfasrv_domain::config::{AgentConfig, AgentFileConfig};

/// mfasrv-agent — on-DC authentication decision agent.
#[derive(Debug, Parser)]
#[command(name = "mfasrv-agent", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "mfasrv-agent.toml", env = "MFASRV_AGENT_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the agent (default when no subcommand is given).
    Serve,
    /// Register with the center and enroll an mTLS certificate.
    Enroll,
    /// Print version information.
    Version,
}

/// Load the agent config; a missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<AgentConfig> {
    if !path.is_file() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(AgentConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let file: AgentFileConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(file.agent)
}
