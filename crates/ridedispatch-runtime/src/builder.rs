//! Runtime Builder API
//!
//! Builder-style setup for consumers (CLI, tests, embedding services): pick
//! a store and a notification bus, start the dispatch task, and get back a
//! handle for feeding events and receiving deliveries.

use alloc::sync::Arc;
use ridedispatch_core::{
    create_command_channel, create_delivery_channel, create_event_channel, Command,
    CommandSender, DeliveryReceiver, DeliverySender, DispatchError, DispatchResult, Event,
    EventSender, RideDispatchConfig, SystemTimeSource, TimeSource,
};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::bus::{ChannelBus, NotificationBus};
use crate::logic::{DispatchEngine, DispatchStatsSnapshot, DispatchTask};
use crate::managers::create_timer_channel;
use crate::store::{create_store, RideStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a running dispatch engine
pub struct RuntimeBuilder {
    config: RideDispatchConfig,
    store: Option<Arc<dyn RideStore>>,
    bus: Option<Arc<dyn NotificationBus>>,
    clock: Arc<dyn TimeSource>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RideDispatchConfig::default(),
            store: None,
            bus: None,
            clock: Arc::new(SystemTimeSource),
        }
    }

    pub fn with_config(mut self, config: RideDispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `store` instead of the one selected by the storage configuration
    pub fn with_store(mut self, store: Arc<dyn RideStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Deliver notifications through `bus` instead of the broadcast channel
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Build and start the runtime
    pub async fn build_and_start(self) -> DispatchResult<RuntimeHandle> {
        self.config.validate()?;
        info!("Building ride dispatch runtime");

        let store = match self.store {
            Some(store) => store,
            None => create_store(&self.config.storage).await?,
        };

        let (bus, delivery_sender, delivery_receiver) = match self.bus {
            Some(bus) => (bus, None, None),
            None => {
                let (sender, receiver) = create_delivery_channel(&self.config.channels);
                let bus: Arc<dyn NotificationBus> = Arc::new(ChannelBus::new(sender.clone()));
                (bus, Some(sender), Some(receiver))
            }
        };

        let (timer_sender, timer_receiver) = create_timer_channel();
        let engine = DispatchEngine::with_time_source(
            self.config.dispatch.clone(),
            store,
            bus,
            timer_sender,
            self.clock,
        );
        engine.restore_timers().await?;

        let (event_sender, event_receiver) = create_event_channel(&self.config.channels);
        let (command_sender, command_receiver) = create_command_channel(&self.config.channels);
        let task = DispatchTask::new(engine.clone(), event_receiver, timer_receiver, command_receiver);
        let task_handle = tokio::spawn(task.run());

        info!(
            pending_timeout_ms = self.config.dispatch.pending_timeout.as_millis() as u64,
            persistent = self.config.storage.data_dir.is_some(),
            "Ride dispatch runtime started"
        );

        Ok(RuntimeHandle {
            engine,
            event_sender,
            command_sender,
            delivery_sender,
            delivery_receiver,
            task_handle: Some(task_handle),
            running: true,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running dispatch engine
pub struct RuntimeHandle {
    engine: DispatchEngine,
    event_sender: EventSender,
    command_sender: CommandSender,
    delivery_sender: Option<DeliverySender>,
    delivery_receiver: Option<DeliveryReceiver>,
    task_handle: Option<JoinHandle<DispatchResult<()>>>,
    running: bool,
}

impl RuntimeHandle {
    /// Sender for inbound events, one clone per transport
    pub fn event_sender(&self) -> EventSender {
        self.event_sender.clone()
    }

    pub async fn send_event(&self, event: Event) -> DispatchResult<()> {
        self.event_sender
            .send(event)
            .await
            .map_err(|_| DispatchError::channel_error("Failed to send event to dispatch task"))
    }

    pub async fn send_command(&self, command: Command) -> DispatchResult<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| DispatchError::channel_error("Failed to send command to dispatch task"))
    }

    /// Take the delivery receiver created at startup (only with the default
    /// channel bus, and only once)
    pub fn take_delivery_receiver(&mut self) -> Option<DeliveryReceiver> {
        self.delivery_receiver.take()
    }

    /// Additional receiver on the default channel bus
    pub fn subscribe_deliveries(&self) -> Option<DeliveryReceiver> {
        self.delivery_sender.as_ref().map(|sender| sender.subscribe())
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.engine.stats().snapshot()
    }

    /// Check if the dispatch task is still running
    pub fn is_running(&self) -> bool {
        self.running
            && self
                .task_handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop accepting work, drain in-flight events and abort live timers
    pub async fn shutdown(&mut self) -> DispatchResult<()> {
        info!("Shutting down ride dispatch runtime");
        if let Err(e) = self.send_command(Command::Shutdown).await {
            warn!("Dispatch task already stopped: {}", e);
        }

        let result = match self.task_handle.take() {
            Some(handle) => match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(DispatchError::channel_error(format!(
                    "Dispatch task panicked: {}",
                    e
                ))),
                Err(_) => {
                    warn!("Dispatch task did not stop within the grace period");
                    self.engine.cancel_all_timers();
                    Ok(())
                }
            },
            None => Ok(()),
        };

        self.running = false;
        info!("Ride dispatch runtime shut down");
        result
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Create a runtime with the testing configuration and an in-memory store
pub async fn create_test_runtime() -> DispatchResult<RuntimeHandle> {
    RuntimeBuilder::new()
        .with_config(RideDispatchConfig::testing())
        .build_and_start()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridedispatch_core::{Notification, RiderId};
    use serde_json::json;

    #[tokio::test]
    async fn test_runtime_builder() {
        let mut runtime = create_test_runtime().await.expect("Failed to build runtime");
        assert!(runtime.is_running());

        let mut deliveries = runtime.take_delivery_receiver().unwrap();
        assert!(runtime.take_delivery_receiver().is_none());

        runtime
            .send_event(Event::NewRide {
                identity: RiderId::new("R1").unwrap(),
                payload: json!({"from": "A", "to": "B"}),
            })
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), deliveries.recv())
            .await
            .expect("delivery timed out")
            .unwrap();
        assert!(matches!(delivery.notification, Notification::RideBroadcast { .. }));

        runtime.shutdown().await.unwrap();
        assert!(!runtime.is_running());
        assert_eq!(runtime.engine().live_timer_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = RideDispatchConfig::testing().with_pending_timeout(Duration::ZERO);
        let result = RuntimeBuilder::new().with_config(config).build_and_start().await;
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }
}
