//! Command handlers for the ride dispatch CLI

use std::io::Write;

use ridedispatch_runtime::{FileRideStore, RuntimeBuilder};
use tokio::io::BufReader;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::stdio::run_bridge;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Serve => Self::handle_serve_command(config).await,
            Commands::Pending => {
                let rendered = Self::pending_rides_json(&config).await?;
                println!("{}", rendered);
                Ok(())
            }
            Commands::Config => {
                print!("{}", config.to_toml()?);
                std::io::stdout().flush()?;
                Ok(())
            }
        }
    }

    /// Run the engine behind the stdio transport until stdin closes or
    /// Ctrl-C is pressed
    async fn handle_serve_command(config: AppConfig) -> Result<()> {
        let mut runtime = RuntimeBuilder::new()
            .with_config(config.dispatch)
            .build_and_start()
            .await?;

        let stop = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        let mut stdout = tokio::io::stdout();
        let summary = run_bridge(
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
            &mut runtime,
            stop,
        )
        .await?;

        info!(
            events = summary.events_forwarded,
            rejected_lines = summary.lines_rejected,
            deliveries = summary.deliveries_written,
            dropped = summary.deliveries_dropped,
            "Bridge stopped"
        );
        Ok(())
    }

    /// Pending rides of the configured data directory, oldest first.
    /// Only reads, so it is safe to run next to a serving process.
    pub async fn pending_rides_json(config: &AppConfig) -> Result<String> {
        let dir = config.dispatch.storage.data_dir.as_ref().ok_or_else(|| {
            CliError::Config("listing pending rides requires --data-dir".to_string())
        })?;

        let rides = FileRideStore::read_pending(dir).await?;
        info!(count = rides.len(), "Loaded pending rides");
        Ok(serde_json::to_string_pretty(&rides)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridedispatch_core::{Ride, RiderId, Timestamp};
    use ridedispatch_runtime::RideStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_pending_requires_data_dir() {
        let config = AppConfig::default();
        assert!(matches!(
            CommandDispatcher::pending_rides_json(&config).await,
            Err(CliError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_lists_stored_rides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.dispatch.storage.data_dir = Some(dir.path().to_path_buf());

        {
            let store = FileRideStore::open(dir.path(), config.dispatch.storage.retry.clone())
                .await
                .unwrap();
            let rider = RiderId::new("R1").unwrap();
            let ride = Ride::new(rider.clone(), json!({"from": "A"}), Timestamp::new(1_000));
            store.upsert(&rider, ride).await.unwrap();
        }

        let rendered = CommandDispatcher::pending_rides_json(&config).await.unwrap();
        let rides: Vec<Ride> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].id, RiderId::new("R1").unwrap());
    }

    #[tokio::test]
    async fn test_pending_does_not_create_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("not-yet");
        let mut config = AppConfig::default();
        config.dispatch.storage.data_dir = Some(data_dir.clone());

        let rendered = CommandDispatcher::pending_rides_json(&config).await.unwrap();
        assert_eq!(serde_json::from_str::<Vec<Ride>>(&rendered).unwrap(), Vec::new());
        assert!(!data_dir.exists());
    }
}
