//! CLI argument definitions for the FediBGS binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fedibgs_core::config::FedibgsConfig;

/// FediBGS - federated timeline ingestion and hybrid search.
#[derive(Parser, Debug)]
#[command(name = "fedibgs", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Read the public timeline stream and index new posts.
    Ingest {
        /// Base URL of the streaming instance or relay.
        #[arg(long = "base-url")]
        base_url: Option<String>,

        /// Bearer token for instances that require one.
        #[arg(long = "token")]
        token: Option<String>,
    },
    /// Serve the search API and the live stream.
    Serve {
        /// API server port.
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Print the closest posts and attachments for a query.
    Search {
        #[arg(required = true)]
        words: Vec<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > FEDIBGS_CONFIG env var > ~/.fedibgs/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("FEDIBGS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > FEDIBGS_PORT env var > config file value > 8000.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Command::Serve { port: Some(p) } = self.command {
            return p;
        }
        if let Some(p) = std::env::var("FEDIBGS_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        8000
    }

    /// Resolve the stream bearer token.
    ///
    /// Priority: --token flag > FEDIBGS_STREAM_TOKEN env var > config file value.
    pub fn resolve_stream_token(&self, config_token: Option<&str>) -> Option<String> {
        if let Command::Ingest {
            token: Some(ref t), ..
        } = self.command
        {
            return Some(t.clone());
        }
        if let Ok(t) = std::env::var("FEDIBGS_STREAM_TOKEN") {
            if !t.is_empty() {
                return Some(t);
            }
        }
        config_token.map(str::to_string)
    }

    /// Apply every command-line and environment override to a loaded config.
    pub fn apply_overrides(&self, config: &mut FedibgsConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if let Command::Ingest {
            base_url: Some(ref url),
            ..
        } = self.command
        {
            config.stream.base_url = url.clone();
        }
        config.general.port = self.resolve_port(config.general.port);
        config.stream.access_token = self.resolve_stream_token(config.stream.access_token.as_deref());
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".fedibgs").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".fedibgs").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_words() {
        let args = CliArgs::try_parse_from(["fedibgs", "search", "red", "pandas"]).unwrap();
        assert_eq!(
            args.command,
            Command::Search {
                words: vec!["red".to_string(), "pandas".to_string()]
            }
        );
    }

    #[test]
    fn test_search_requires_words() {
        assert!(CliArgs::try_parse_from(["fedibgs", "search"]).is_err());
    }

    #[test]
    fn test_port_flag_wins_over_config() {
        let args = CliArgs::try_parse_from(["fedibgs", "serve", "--port", "9100"]).unwrap();
        assert_eq!(args.resolve_port(8000), 9100);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = CliArgs::try_parse_from([
            "fedibgs",
            "--data-dir",
            "/tmp/fedibgs",
            "-l",
            "debug",
            "ingest",
            "--base-url",
            "https://relay.example",
            "--token",
            "abc123",
        ])
        .unwrap();
        let mut config = FedibgsConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.general.data_dir, "/tmp/fedibgs");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.stream.base_url, "https://relay.example");
        assert_eq!(config.stream.access_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_config_flag_wins() {
        let args =
            CliArgs::try_parse_from(["fedibgs", "serve", "--config", "/etc/fedibgs.toml"]).unwrap();
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/fedibgs.toml"));
    }
}
