//! Device Hub
//!
//! The pipeline between appliances and dashboards:
//!
//! ```text
//! device data ─► DataIngestor ─► store ─► data topic ─► StreamHub ─► observers
//! dashboard edit ─► DeviceRegistry::set_config ─► patch topic ─► ConfigDistributor ─► device
//! ```
//!
//! [`Hub`] owns one of each component and wires them to a shared
//! [`EventBus`]. Transports (HTTP, websockets, device sockets) only call
//! into the hub.

pub mod distributor;
mod error;
pub mod ingest;
pub mod registry;

pub use distributor::{ConfigDistributor, ConnectionPool, Delivery};
pub use error::{HubError, HubResult};
pub use ingest::DataIngestor;
pub use registry::DeviceRegistry;

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::device::DeviceConfig;
use crate::events::{EventBus, RetryPolicy, DEFAULT_DATA_TOPIC, DEFAULT_PATCH_TOPIC};
use crate::logging::event;
use crate::shutdown::Shutdown;
use crate::store::{Broker, DeviceStore, MemoryStore};
use crate::websocket::StreamHub;

/// Tunables for the hub components
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub patch_topic: String,
    pub data_topic: String,
    pub write_timeout: Duration,
    pub max_observers_per_device: usize,
    pub broadcast_capacity: usize,
    /// Frames queued per connection before it counts as stalled
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            patch_topic: DEFAULT_PATCH_TOPIC.to_string(),
            data_topic: DEFAULT_DATA_TOPIC.to_string(),
            write_timeout: Duration::from_secs(5),
            max_observers_per_device: 64,
            broadcast_capacity: 1024,
            queue_capacity: 64,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&Config> for HubOptions {
    fn from(config: &Config) -> Self {
        Self {
            patch_topic: config.events.patch_topic.clone(),
            data_topic: config.events.data_topic.clone(),
            write_timeout: Duration::from_millis(config.delivery.write_timeout_ms),
            max_observers_per_device: config.stream.max_observers_per_device,
            broadcast_capacity: config.events.broadcast_capacity,
            queue_capacity: config.delivery.queue_capacity,
            retry: RetryPolicy {
                attempts: config.retry.attempts,
                delay: Duration::from_millis(config.retry.delay_ms),
            },
        }
    }
}

pub struct Hub {
    pub registry: DeviceRegistry,
    pub distributor: Arc<ConfigDistributor>,
    pub ingestor: DataIngestor,
    pub stream: Arc<StreamHub>,
    pub bus: EventBus,
    store: Arc<dyn DeviceStore>,
    options: HubOptions,
}

impl Hub {
    pub fn new(store: Arc<dyn DeviceStore>, broker: Arc<dyn Broker>, options: HubOptions) -> Self {
        let bus = EventBus::new(broker);
        Self {
            registry: DeviceRegistry::new(Arc::clone(&store)),
            distributor: Arc::new(
                ConfigDistributor::new(options.write_timeout).with_queue_capacity(options.queue_capacity),
            ),
            ingestor: DataIngestor::new(Arc::clone(&store), bus.clone(), options.data_topic.clone()),
            stream: Arc::new(
                StreamHub::new(options.max_observers_per_device, options.write_timeout)
                    .with_queue_capacity(options.queue_capacity),
            ),
            bus,
            store,
            options,
        }
    }

    /// Hub backed by a single in-process store and broker
    pub fn in_memory(options: HubOptions) -> Self {
        let store = Arc::new(MemoryStore::with_capacity(options.broadcast_capacity));
        Self::new(store.clone(), store, options)
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Persist a new configuration, then announce it to the device
    ///
    /// The device is sent the stored form of the payload. The two steps are
    /// not atomic: if publishing fails the new configuration is kept and
    /// reaches the device on its next bootstrap.
    pub async fn patch_config(&self, config: &DeviceConfig) -> HubResult<usize> {
        let stored = self.registry.set_config(config).await?;
        ConfigDistributor::publish_patch(&self.bus, &self.options.patch_topic, &stored).await
    }

    /// Start the patch listener, the stream fan-out and its reclaim loop
    pub fn start(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let patch = Arc::clone(&self.distributor).start(
            self.bus.clone(),
            self.options.patch_topic.clone(),
            self.options.retry,
            shutdown.clone(),
        );
        let stream = Arc::clone(&self.stream).start(
            self.bus.clone(),
            self.options.data_topic.clone(),
            self.options.retry,
            shutdown.clone(),
        );
        tracing::info!(
            event = event::SVC_STARTED,
            patch_topic = %self.options.patch_topic,
            data_topic = %self.options.data_topic,
            "Hub started"
        );
        vec![patch, stream]
    }

    /// Close every connection, then the broker and the store
    pub async fn shutdown(&self) {
        self.distributor.close_all().await;
        self.stream.close_all().await;

        if let Err(e) = self.bus.close().await {
            tracing::warn!(error = %e, "Failed to close broker");
        }
        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "Failed to close store");
        }
        tracing::info!(event = event::SVC_SHUTDOWN, "Hub stopped");
    }
}

/// Spawn one unit of work whose panic is logged and contained
pub(crate) fn spawn_isolated<F>(unit: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_isolated(unit, fut))
}

/// Run one unit of work in place, logging and containing its panic
pub(crate) async fn run_isolated<F>(unit: &'static str, fut: F)
where
    F: Future<Output = ()> + Send,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(event = event::PANIC, unit, panic = %message, "Recovered from panic");
    }
}
