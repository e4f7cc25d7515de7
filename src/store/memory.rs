//! In-memory store and broker
//!
//! Keeps all device state in process and fans published payloads out over
//! tokio broadcast channels, one channel per topic. Subscribers that fall
//! more than `capacity` messages behind skip the missed payloads, which is
//! the same gap tolerance a networked broker gives.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};

use super::{Broker, DeviceStore, StoreError, StoreResult, Subscription};
use crate::device::{DataPoint, DeviceConfig, DeviceId, DeviceIdentity};

/// Default per-topic buffer
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    identities: BTreeMap<DeviceId, DeviceIdentity>,
    configs: BTreeMap<DeviceId, DeviceConfig>,
    registered: BTreeSet<DeviceId>,
    data: BTreeMap<DeviceId, Vec<DataPoint>>,
}

/// In-process implementation of [`DeviceStore`] and [`Broker`]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    topics: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
    store_closed: AtomicBool,
    broker_closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Create a store whose topics buffer `capacity` payloads per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            store_closed: AtomicBool::new(false),
            broker_closed: AtomicBool::new(false),
        }
    }

    fn check_store(&self) -> StoreResult<()> {
        if self.store_closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is closed".to_string()));
        }
        Ok(())
    }

    fn check_broker(&self) -> StoreResult<()> {
        if self.broker_closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("broker is disconnected".to_string()));
        }
        Ok(())
    }

    /// Number of live subscriptions on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn set_identity(&self, identity: &DeviceIdentity) -> StoreResult<()> {
        self.check_store()?;
        self.tables
            .write()
            .await
            .identities
            .insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn get_identity(&self, id: &DeviceId) -> StoreResult<DeviceIdentity> {
        self.check_store()?;
        self.tables
            .read()
            .await
            .identities
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity for {}", id)))
    }

    async fn list_identities(&self) -> StoreResult<Vec<DeviceIdentity>> {
        self.check_store()?;
        Ok(self.tables.read().await.identities.values().cloned().collect())
    }

    async fn is_registered(&self, id: &DeviceId) -> StoreResult<bool> {
        self.check_store()?;
        Ok(self.tables.read().await.registered.contains(id))
    }

    async fn mark_registered(&self, id: &DeviceId) -> StoreResult<()> {
        self.check_store()?;
        self.tables.write().await.registered.insert(id.clone());
        Ok(())
    }

    async fn get_config(&self, id: &DeviceId) -> StoreResult<DeviceConfig> {
        self.check_store()?;
        self.tables
            .read()
            .await
            .configs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("config for {}", id)))
    }

    async fn set_config(&self, config: &DeviceConfig) -> StoreResult<()> {
        self.check_store()?;
        self.tables
            .write()
            .await
            .configs
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn get_default_config(&self, identity: &DeviceIdentity) -> StoreResult<DeviceConfig> {
        self.check_store()?;
        let payload = identity.kind.device().default_payload()?;
        Ok(DeviceConfig::new(identity.id.clone(), payload))
    }

    async fn save_data_point(&self, point: &DataPoint) -> StoreResult<()> {
        self.check_store()?;
        self.tables
            .write()
            .await
            .data
            .entry(point.id.clone())
            .or_default()
            .push(point.clone());
        Ok(())
    }

    async fn query_data(&self, id: &DeviceId) -> StoreResult<Vec<DataPoint>> {
        self.check_store()?;
        Ok(self
            .tables
            .read()
            .await
            .data
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn query_all_data(&self) -> StoreResult<Vec<DataPoint>> {
        self.check_store()?;
        Ok(self
            .tables
            .read()
            .await
            .data
            .values()
            .flat_map(|points| points.iter().cloned())
            .collect())
    }

    async fn close(&self) -> StoreResult<()> {
        self.store_closed.store(true, Ordering::SeqCst);
        tracing::debug!("Memory store closed");
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryStore {
    async fn publish(&self, topic: &str, payload: Bytes) -> StoreResult<usize> {
        self.check_broker()?;
        let topics = self.topics.read().await;
        match topics.get(topic) {
            // send only fails when nobody is listening
            Some(tx) => Ok(tx.send(payload).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<Subscription> {
        self.check_broker()?;
        let rx = {
            let mut topics = self.topics.write().await;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let name = topic.to_string();
        let stream = stream::unfold((rx, name), |(mut rx, name)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, name))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %name, skipped, "Subscriber lagged, payloads dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Subscription::new(topic, stream.boxed()))
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.broker_closed.store(true, Ordering::SeqCst);
        // dropping the senders ends every open subscription
        self.topics.write().await.clear();
        tracing::debug!("Memory broker disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use std::time::Duration;

    fn identity(id: &str) -> DeviceIdentity {
        DeviceIdentity::new(DeviceKind::Fridge, "kitchen", DeviceId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_config_roundtrip_and_not_found() {
        let store = MemoryStore::new();
        let id = DeviceId::parse("AA:BB").unwrap();

        let missing = store.get_config(&id).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        let config = DeviceConfig::new(id.clone(), &b"{}"[..]);
        store.set_config(&config).await.unwrap();
        assert_eq!(store.get_config(&id).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_registration_marker() {
        let store = MemoryStore::new();
        let id = DeviceId::parse("AA:BB").unwrap();

        assert!(!store.is_registered(&id).await.unwrap());
        store.mark_registered(&id).await.unwrap();
        assert!(store.is_registered(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_config_follows_kind() {
        let store = MemoryStore::new();
        let config = store.get_default_config(&identity("AA:BB")).await.unwrap();
        assert_eq!(config.id.as_str(), "AA:BB");
        assert!(DeviceKind::Fridge.device().decode_config(&config.payload).is_ok());
    }

    #[tokio::test]
    async fn test_data_history_keeps_insertion_order() {
        let store = MemoryStore::new();
        let a = DeviceId::parse("AA").unwrap();
        let b = DeviceId::parse("BB").unwrap();

        store.save_data_point(&DataPoint::with_time(a.clone(), &b"1"[..], 20)).await.unwrap();
        store.save_data_point(&DataPoint::with_time(a.clone(), &b"2"[..], 10)).await.unwrap();
        store.save_data_point(&DataPoint::with_time(b.clone(), &b"3"[..], 5)).await.unwrap();

        let history = store.query_data(&a).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].time, 20);
        assert_eq!(history[1].time, 10);

        assert_eq!(store.query_all_data().await.unwrap().len(), 3);
        assert!(store.query_data(&DeviceId::parse("CC").unwrap()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        let result = store.set_identity(&identity("AA:BB")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_reaches_nobody() {
        let store = MemoryStore::new();
        let delivered = store.publish("data", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscription() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("data").await.unwrap();
        let mut second = store.subscribe("data").await.unwrap();
        let mut other = store.subscribe("cfg").await.unwrap();

        let delivered = store.publish("data", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(first.next().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(second.next().await.unwrap(), Bytes::from_static(b"hello"));

        let nothing = tokio::time::timeout(Duration::from_millis(50), other.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_gap() {
        let store = MemoryStore::with_capacity(2);
        let mut sub = store.subscribe("data").await.unwrap();

        for i in 0..5u8 {
            store.publish("data", Bytes::from(vec![i])).await.unwrap();
        }

        // the oldest payloads were overwritten; the newest survive
        assert_eq!(sub.next().await.unwrap(), Bytes::from(vec![3u8]));
        assert_eq!(sub.next().await.unwrap(), Bytes::from(vec![4u8]));
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscriptions() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("data").await.unwrap();

        store.disconnect().await.unwrap();
        assert!(sub.next().await.is_none());
        assert!(matches!(
            store.publish("data", Bytes::new()).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
