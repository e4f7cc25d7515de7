//! Config Distributor
//!
//! Keeps the live configuration connection of every device and pushes
//! configuration patches to it as they are published. Delivery is
//! at-most-once: a device that is offline when its patch is published picks
//! up the new configuration on its next bootstrap instead.
//!
//! Patches are handled in publish order and queued on the device's
//! [`Outbox`], so one device sees its patches in order and a stalled device
//! never holds up the others. A queue whose writer fails reports its key on
//! the failed-writes feed and the reclaim loop drops the pool entry.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{run_isolated, HubResult};
use crate::connection::{Arena, Connection, Outbox, OutboxSettings, SlotKey};
use crate::device::{DeviceConfig, DeviceId};
use crate::events::{ConfigPatch, EventBus, RetryPolicy};
use crate::logging::event;
use crate::shutdown::Shutdown;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Outcome of pushing one patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued behind earlier patches for the device's connection
    Queued,
    NotConnected,
    WriteFailed,
}

struct PoolEntry {
    id: DeviceId,
    outbox: Outbox,
}

/// At most one current connection per device
pub struct ConnectionPool {
    entries: Arena<PoolEntry>,
    current: HashMap<DeviceId, SlotKey>,
    settings: OutboxSettings,
}

impl ConnectionPool {
    pub fn new(settings: OutboxSettings) -> Self {
        Self {
            entries: Arena::new(),
            current: HashMap::new(),
            settings,
        }
    }

    /// Make `conn` the device's connection, returning the one it displaced
    pub fn register(
        &mut self,
        id: DeviceId,
        conn: Arc<dyn Connection>,
    ) -> (SlotKey, Option<Arc<dyn Connection>>) {
        let displaced = self
            .current
            .remove(&id)
            .and_then(|old| self.entries.remove(old))
            .map(|entry| Arc::clone(entry.outbox.conn()));

        let settings = &self.settings;
        let key = self.entries.insert_with(|key| PoolEntry {
            id: id.clone(),
            outbox: settings.open(key, conn),
        });
        self.current.insert(id, key);
        (key, displaced)
    }

    fn entry(&self, id: &DeviceId) -> Option<(SlotKey, &PoolEntry)> {
        let key = *self.current.get(id)?;
        self.entries.get(key).map(|entry| (key, entry))
    }

    pub fn lookup(&self, id: &DeviceId) -> Option<(SlotKey, Arc<dyn Connection>)> {
        self.entry(id)
            .map(|(key, entry)| (key, Arc::clone(entry.outbox.conn())))
    }

    /// Device an entry belongs to, if the key is still live
    pub fn owner(&self, key: SlotKey) -> Option<DeviceId> {
        self.entries.get(key).map(|entry| entry.id.clone())
    }

    /// Remove the device's entry only if `key` is still the current one
    pub fn remove_if_current(&mut self, id: &DeviceId, key: SlotKey) -> Option<Arc<dyn Connection>> {
        if self.current.get(id) != Some(&key) {
            return None;
        }
        self.current.remove(id);
        self.entries
            .remove(key)
            .map(|entry| Arc::clone(entry.outbox.conn()))
    }

    pub fn drain(&mut self) -> Vec<(DeviceId, Arc<dyn Connection>)> {
        self.current.clear();
        self.entries
            .drain()
            .into_iter()
            .map(|entry| (entry.id, Arc::clone(entry.outbox.conn())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

pub struct ConfigDistributor {
    pool: Mutex<ConnectionPool>,
    failed_rx: Mutex<Option<mpsc::UnboundedReceiver<SlotKey>>>,
}

impl ConfigDistributor {
    pub fn new(write_timeout: Duration) -> Self {
        Self::with_settings(write_timeout, DEFAULT_QUEUE_CAPACITY)
    }

    /// Patches that may wait per device before a delivery counts as failed
    pub fn with_queue_capacity(self, capacity: usize) -> Self {
        let write_timeout = self.pool.into_inner().settings.write_timeout;
        Self::with_settings(write_timeout, capacity)
    }

    fn with_settings(write_timeout: Duration, capacity: usize) -> Self {
        let (failed, failed_rx) = mpsc::unbounded_channel();
        let settings = OutboxSettings {
            capacity,
            write_timeout,
            failed,
        };
        Self {
            pool: Mutex::new(ConnectionPool::new(settings)),
            failed_rx: Mutex::new(Some(failed_rx)),
        }
    }

    /// Make `conn` the live config connection of `id`
    ///
    /// A connection it supersedes is closed in the background.
    pub async fn register_connection(&self, id: DeviceId, conn: Arc<dyn Connection>) -> SlotKey {
        let peer = conn.peer();
        let (key, displaced) = self.pool.lock().await.register(id.clone(), conn);

        if let Some(old) = displaced {
            tracing::info!(device_id = %id, old_peer = %old.peer(), "Superseded config connection");
            tokio::spawn(async move { old.close().await });
        }

        tracing::debug!(device_id = %id, peer = %peer, slot = %key, "Config connection pooled");
        key
    }

    /// Forget a connection the transport saw close
    pub async fn unregister(&self, id: &DeviceId, key: SlotKey) -> bool {
        let removed = self.pool.lock().await.remove_if_current(id, key);
        removed.is_some()
    }

    pub async fn connection_count(&self) -> usize {
        self.pool.lock().await.len()
    }

    pub async fn is_connected(&self, id: &DeviceId) -> bool {
        self.pool.lock().await.lookup(id).is_some()
    }

    /// Queue one patch on the device's current connection
    ///
    /// A connection whose queue is full or whose writer already gave up is
    /// dropped from the pool and closed.
    pub async fn deliver(&self, patch: &ConfigPatch) -> Delivery {
        let mut pool = self.pool.lock().await;
        let Some((key, entry)) = pool.entry(&patch.id) else {
            tracing::warn!(device_id = %patch.id, "No live connection, patch dropped");
            return Delivery::NotConnected;
        };

        match entry.outbox.push(patch.payload()) {
            Ok(()) => {
                tracing::debug!(device_id = %patch.id, peer = %entry.outbox.conn().peer(), "Patch queued");
                Delivery::Queued
            }
            Err(e) => {
                tracing::warn!(device_id = %patch.id, peer = %entry.outbox.conn().peer(), error = %e, "Patch write failed");
                let removed = pool.remove_if_current(&patch.id, key);
                drop(pool);
                if let Some(conn) = removed {
                    conn.close().await;
                }
                Delivery::WriteFailed
            }
        }
    }

    /// Decode a raw patch event and deliver it
    pub async fn handle_event(&self, raw: &[u8]) -> Option<Delivery> {
        match ConfigPatch::decode(raw) {
            Ok(patch) => Some(self.deliver(&patch).await),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed patch event dropped");
                None
            }
        }
    }

    /// Drop a pool entry whose queued write failed
    pub async fn reclaim(&self, key: SlotKey) -> bool {
        let removed = {
            let mut pool = self.pool.lock().await;
            pool.owner(key)
                .and_then(|id| pool.remove_if_current(&id, key).map(|conn| (id, conn)))
        };
        match removed {
            Some((id, conn)) => {
                conn.close().await;
                tracing::info!(device_id = %id, slot = %key, "Dead config connection reclaimed");
                true
            }
            None => {
                tracing::trace!(slot = %key, "Stale config connection key ignored");
                false
            }
        }
    }

    /// Consume the failed-writes feed until shutdown
    ///
    /// Only the first call gets the feed; later calls return immediately.
    pub async fn reclaim_loop(&self, shutdown: &Shutdown) {
        let Some(mut failed) = self.failed_rx.lock().await.take() else {
            tracing::warn!("Config reclaim loop already running");
            return;
        };

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                key = failed.recv() => match key {
                    Some(key) => {
                        self.reclaim(key).await;
                    }
                    None => break,
                },
            }
        }

        *self.failed_rx.lock().await = Some(failed);
    }

    /// Run the patch listener and the reclaim loop until shutdown
    pub fn start(
        self: Arc<Self>,
        bus: EventBus,
        topic: String,
        retry: RetryPolicy,
        shutdown: Shutdown,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(topic = %topic, "Patch listener started");
            let distributor = Arc::clone(&self);
            let listener = bus.listen(&topic, &retry, &shutdown, move |raw: Bytes| {
                let distributor = Arc::clone(&distributor);
                run_isolated("patch delivery", async move {
                    distributor.handle_event(&raw).await;
                })
            });
            tokio::join!(listener, self.reclaim_loop(&shutdown));
            tracing::info!(topic = %topic, "Patch listener stopped");
        })
    }

    /// Publish a patch event for a configuration that was just persisted
    pub async fn publish_patch(bus: &EventBus, topic: &str, config: &DeviceConfig) -> HubResult<usize> {
        let patch = ConfigPatch::new(config)?;
        let delivered = bus.publish(topic, patch.encode()?).await?;
        tracing::info!(
            event = event::CFG_PATCH_CREATED,
            device_id = %config.id,
            listeners = delivered,
            "Config patch published"
        );
        Ok(delivered)
    }

    /// Close every pooled connection
    pub async fn close_all(&self) {
        let drained = self.pool.lock().await.drain();
        for (id, conn) in drained {
            tracing::debug!(device_id = %id, "Closing config connection");
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    const PAYLOAD: &[u8] = br#"{"turnedOn":false,"streamOn":true,"collectFreq":10,"sendFreq":20}"#;

    fn channel(peer: &str) -> (Arc<dyn Connection>, mpsc::Receiver<Bytes>) {
        let (conn, rx) = ChannelConnection::new(peer, 8);
        (Arc::new(conn), rx)
    }

    fn patch(id: &str) -> ConfigPatch {
        ConfigPatch::new(&DeviceConfig::new(DeviceId::parse(id).unwrap(), PAYLOAD)).unwrap()
    }

    fn distributor() -> ConfigDistributor {
        ConfigDistributor::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_deliver_writes_exact_payload() {
        let distributor = distributor();
        let (conn, mut rx) = channel("a");
        distributor
            .register_connection(DeviceId::parse("AA:BB").unwrap(), conn)
            .await;

        assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::Queued);
        assert_eq!(&rx.recv().await.unwrap()[..], PAYLOAD);
    }

    #[tokio::test]
    async fn test_deliver_without_connection_is_dropped() {
        let distributor = distributor();
        assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::NotConnected);
    }

    #[tokio::test]
    async fn test_latest_registration_wins() {
        let distributor = distributor();
        let id = DeviceId::parse("AA:BB").unwrap();
        let (first, mut first_rx) = channel("first");
        let (second, mut second_rx) = channel("second");

        distributor.register_connection(id.clone(), first).await;
        distributor.register_connection(id.clone(), second).await;
        assert_eq!(distributor.connection_count().await, 1);

        assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::Queued);
        assert_eq!(&second_rx.recv().await.unwrap()[..], PAYLOAD);

        // the displaced connection is closed, never written to
        let first_next = tokio::time::timeout(Duration::from_secs(1), first_rx.recv())
            .await
            .unwrap();
        assert!(first_next.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_removes_entry() {
        let distributor = Arc::new(distributor());
        let shutdown = Shutdown::new();
        let reclaimer = {
            let distributor = Arc::clone(&distributor);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { distributor.reclaim_loop(&shutdown).await })
        };

        let id = DeviceId::parse("AA:BB").unwrap();
        let (conn, rx) = channel("dead");
        distributor.register_connection(id.clone(), conn).await;
        drop(rx);

        assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::Queued);
        for _ in 0..200 {
            if !distributor.is_connected(&id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!distributor.is_connected(&id).await);
        assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::NotConnected);

        shutdown.trigger("test");
        reclaimer.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_connection() {
        let distributor = distributor().with_queue_capacity(1);
        let id = DeviceId::parse("AA:BB").unwrap();
        let (conn, _rx) = ChannelConnection::new("stalled", 1);
        distributor.register_connection(id.clone(), Arc::new(conn)).await;

        let mut outcomes = Vec::new();
        for _ in 0..8 {
            let outcome = distributor.deliver(&patch("AA:BB")).await;
            outcomes.push(outcome);
            if outcome != Delivery::Queued {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(outcomes.last(), Some(&Delivery::WriteFailed));
        assert!(!distributor.is_connected(&id).await);
    }

    #[tokio::test]
    async fn test_stalled_device_does_not_block_others() {
        let distributor = distributor();
        let (stalled, _stalled_rx) = ChannelConnection::new("stalled", 1);
        let (healthy, mut healthy_rx) = channel("healthy");
        distributor
            .register_connection(DeviceId::parse("AA:BB").unwrap(), Arc::new(stalled))
            .await;
        distributor
            .register_connection(DeviceId::parse("CC:DD").unwrap(), healthy)
            .await;

        for _ in 0..3 {
            assert_eq!(distributor.deliver(&patch("AA:BB")).await, Delivery::Queued);
        }
        assert_eq!(distributor.deliver(&patch("CC:DD")).await, Delivery::Queued);

        // well under the 200ms write timeout the stalled peer is holding
        let received = tokio::time::timeout(Duration::from_millis(50), healthy_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received[..], PAYLOAD);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_connection() {
        let distributor = distributor();
        let id = DeviceId::parse("AA:BB").unwrap();
        let (first, _first_rx) = channel("first");
        let (second, _second_rx) = channel("second");

        let old_key = distributor.register_connection(id.clone(), first).await;
        let new_key = distributor.register_connection(id.clone(), second).await;

        assert!(!distributor.unregister(&id, old_key).await);
        assert!(distributor.is_connected(&id).await);
        assert!(distributor.unregister(&id, new_key).await);
        assert!(!distributor.is_connected(&id).await);
    }

    #[tokio::test]
    async fn test_listener_delivers_published_patch() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(store.clone());
        let shutdown = Shutdown::new();
        let distributor = Arc::new(distributor());

        let id = DeviceId::parse("AA:BB").unwrap();
        let (conn, mut rx) = channel("a");
        distributor.register_connection(id.clone(), conn).await;

        let handle = Arc::clone(&distributor).start(
            bus.clone(),
            "cfg".to_string(),
            RetryPolicy::default(),
            shutdown.clone(),
        );
        while store.subscriber_count("cfg").await == 0 {
            tokio::task::yield_now().await;
        }

        let config = DeviceConfig::new(id, PAYLOAD);
        let listeners = ConfigDistributor::publish_patch(&bus, "cfg", &config).await.unwrap();
        assert_eq!(listeners, 1);

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received[..], PAYLOAD);

        shutdown.trigger("test");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_patches_reach_device_in_publish_order() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(store.clone());
        let shutdown = Shutdown::new();
        let distributor = Arc::new(distributor());

        let id = DeviceId::parse("AA:BB").unwrap();
        let (conn, mut rx) = channel("a");
        distributor.register_connection(id.clone(), conn).await;

        let handle = Arc::clone(&distributor).start(
            bus.clone(),
            "cfg".to_string(),
            RetryPolicy::default(),
            shutdown.clone(),
        );
        while store.subscriber_count("cfg").await == 0 {
            tokio::task::yield_now().await;
        }

        let payloads: Vec<String> = (0..20)
            .map(|n| format!(r#"{{"turnedOn":true,"streamOn":true,"collectFreq":{},"sendFreq":1}}"#, n))
            .collect();
        for payload in &payloads {
            let config = DeviceConfig::new(id.clone(), payload.clone());
            ConfigDistributor::publish_patch(&bus, "cfg", &config).await.unwrap();
        }

        for payload in &payloads {
            let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&received[..], payload.as_bytes());
        }

        shutdown.trigger("test");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_all_closes_connections() {
        let distributor = distributor();
        let (conn, mut rx) = channel("a");
        distributor
            .register_connection(DeviceId::parse("AA:BB").unwrap(), conn)
            .await;

        distributor.close_all().await;
        assert_eq!(distributor.connection_count().await, 0);
        assert!(rx.recv().await.is_none());
    }
}
