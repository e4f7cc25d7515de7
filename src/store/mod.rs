//! Store
//!
//! Durable keyed storage and the pub/sub broker the hub is built on.
//! The hub only ever talks to these two traits, so the backing service can
//! be swapped without touching component code.
//!
//! - **DeviceStore**: identities, configurations, registration markers and
//!   data history, all keyed by device id
//! - **Broker**: topic based publish/subscribe
//! - **MemoryStore**: in-process implementation of both
//!
//! # Persisted layout
//!
//! ```text
//! identity:{id}    → DeviceIdentity
//! config:{id}      → DeviceConfig
//! registered:{id}  → marker
//! data:{id}        → [DataPoint] (insertion order)
//! ```

mod error;
mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::device::{DataPoint, DeviceConfig, DeviceId, DeviceIdentity};

/// Keyed storage for device state
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Persist or update a device's identity metadata
    async fn set_identity(&self, identity: &DeviceIdentity) -> StoreResult<()>;

    async fn get_identity(&self, id: &DeviceId) -> StoreResult<DeviceIdentity>;

    async fn list_identities(&self) -> StoreResult<Vec<DeviceIdentity>>;

    async fn is_registered(&self, id: &DeviceId) -> StoreResult<bool>;

    async fn mark_registered(&self, id: &DeviceId) -> StoreResult<()>;

    async fn get_config(&self, id: &DeviceId) -> StoreResult<DeviceConfig>;

    async fn set_config(&self, config: &DeviceConfig) -> StoreResult<()>;

    /// Default configuration for the identity's device kind
    async fn get_default_config(&self, identity: &DeviceIdentity) -> StoreResult<DeviceConfig>;

    async fn save_data_point(&self, point: &DataPoint) -> StoreResult<()>;

    /// Data history of one device, oldest first
    async fn query_data(&self, id: &DeviceId) -> StoreResult<Vec<DataPoint>>;

    async fn query_all_data(&self) -> StoreResult<Vec<DataPoint>>;

    /// Release the connection; later calls fail with `Unavailable`
    async fn close(&self) -> StoreResult<()>;
}

/// Topic based publish/subscribe
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload, returning how many subscribers received it
    async fn publish(&self, topic: &str, payload: Bytes) -> StoreResult<usize>;

    async fn subscribe(&self, topic: &str) -> StoreResult<Subscription>;

    /// Drop every subscription; later calls fail with `Unavailable`
    async fn disconnect(&self) -> StoreResult<()>;
}

/// A stream of payloads from one topic, consumed by exactly one loop
pub struct Subscription {
    topic: String,
    stream: BoxStream<'static, Bytes>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, stream: BoxStream<'static, Bytes>) -> Self {
        Self {
            topic: topic.into(),
            stream,
        }
    }

    /// Wait for the next payload
    ///
    /// Returns `None` once the broker ends the subscription.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.stream.next().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
