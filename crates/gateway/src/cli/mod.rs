pub mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use rt_domain::config::Config;

/// RunTrail — real-time run capture, replay, and analysis.
#[derive(Debug, Parser)]
#[command(name = "runtrail", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the configuration file (default `runtrail.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
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

const DEFAULT_CONFIG_PATH: &str = "runtrail.toml";

/// Load the configuration.
///
/// An explicitly given path must exist; the default path falls back to
/// built-in defaults when absent (dev mode).
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_missing_config_is_an_error() {
        let missing = Path::new("/nonexistent/runtrail.toml");
        assert!(load_config(Some(missing)).is_err());
    }

    #[test]
    fn config_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtrail.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[server]\nport = 4000").unwrap();

        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtrail.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
