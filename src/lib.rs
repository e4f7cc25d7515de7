//! # devhub
//!
//! Device hub for a fleet of embedded appliances (refrigerators and washing
//! machines). Devices bootstrap over TCP, receive configuration patches on a
//! long-lived connection and stream data that is persisted and fanned out to
//! dashboard observers over WebSocket.
//!
//! ## Modules
//!
//! - [`device`]: Device kinds, identities and payload schemas
//! - [`store`]: Persistence and publish/subscribe seams, in-memory backend
//! - [`events`]: Event bus and wire messages
//! - [`hub`]: Registry, config distributor and data ingestor
//! - [`websocket`]: Live data streaming to observers
//! - [`transport`]: TCP listeners for devices
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devhub::device::{DeviceConfig, DeviceMeta};
//! use devhub::hub::{Hub, HubOptions};
//! use devhub::shutdown::Shutdown;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::in_memory(HubOptions::default());
//!     let shutdown = Shutdown::new();
//!     let handles = hub.start(&shutdown);
//!
//!     // First contact stores the default configuration
//!     let config = hub
//!         .registry
//!         .bootstrap(&DeviceMeta::new("fridge", "kitchen", "AA:BB"))
//!         .await?;
//!
//!     // Replace it and push it to the device's pooled connection
//!     let patch = r#"{"turnedOn":true,"streamOn":true,"collectFreq":500,"sendFreq":2000}"#;
//!     let listeners = hub.patch_config(&DeviceConfig::new(config.id, patch)).await?;
//!     println!("patch seen by {} listener(s)", listeners);
//!
//!     shutdown.trigger("done");
//!     for handle in handles {
//!         handle.await?;
//!     }
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod device;
pub mod events;
pub mod hub;
pub mod logging;
pub mod shutdown;
pub mod store;
pub mod transport;
pub mod websocket;

// Re-export top-level types for convenience
pub use device::{
    ConfigSchema, DataPoint, DataSchema, Device, DeviceConfig, DeviceError, DeviceId,
    DeviceIdentity, DeviceKind, DeviceMeta,
};

pub use store::{Broker, DeviceStore, MemoryStore, StoreError, StoreResult, Subscription};

pub use events::{ConfigPatch, DataChanged, EventBus, RetryPolicy};

pub use connection::{ChannelConnection, Connection, ConnectionError, TcpConnection};

pub use hub::{
    ConfigDistributor, DataIngestor, DeviceRegistry, Hub, HubError, HubOptions, HubResult,
};

pub use websocket::{stream_handler, StreamHub};

pub use transport::{ConfigServer, DataServer, TransportError};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};

pub use shutdown::Shutdown;
