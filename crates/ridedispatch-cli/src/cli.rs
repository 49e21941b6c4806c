//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Data directory for ride persistence; rides stay in memory without it
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Seconds a ride may stay pending before it expires
    #[arg(long)]
    pub pending_timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the dispatch engine, reading events from stdin as JSON lines and
    /// writing deliveries to stdout as JSON lines
    Serve,
    /// Print the pending rides stored in the data directory
    Pending,
    /// Print the effective configuration as TOML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_overrides() {
        let cli = Cli::parse_from([
            "ridedispatch",
            "-v",
            "--data-dir",
            "/tmp/rides",
            "--pending-timeout-secs",
            "90",
            "serve",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.command, Commands::Serve);
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/rides"));
        assert_eq!(cli.pending_timeout_secs, Some(90));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["ridedispatch"]).is_err());
    }
}
