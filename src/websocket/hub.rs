//! Stream Hub
//!
//! Registry of observer connections per device and fan-out of data events
//! to them. Fan-out runs under the registry lock and only queues the frame
//! on each observer's [`Outbox`], so every observer sees frames in publish
//! order and a slow observer only delays itself. A write that fails
//! sends the observer's key down the closed-connections feed; the reclaim
//! loop is the only place observers are pruned after a failure.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::connection::{Arena, Connection, Outbox, OutboxSettings, SlotKey};
use crate::device::DeviceId;
use crate::events::{DataChanged, EventBus, RetryPolicy};
use crate::hub::{run_isolated, HubError, HubResult};
use crate::logging::event;
use crate::shutdown::Shutdown;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Observer {
    id: DeviceId,
    outbox: Outbox,
}

/// Observer sets keyed by device, in registration order
pub struct ObserverRegistry {
    observers: Arena<Observer>,
    sets: HashMap<DeviceId, Vec<SlotKey>>,
    settings: OutboxSettings,
}

impl ObserverRegistry {
    pub fn new(settings: OutboxSettings) -> Self {
        Self {
            observers: Arena::new(),
            sets: HashMap::new(),
            settings,
        }
    }

    pub fn add(&mut self, id: DeviceId, conn: Arc<dyn Connection>) -> SlotKey {
        let settings = &self.settings;
        let key = self.observers.insert_with(|key| Observer {
            id: id.clone(),
            outbox: settings.open(key, conn),
        });
        self.sets.entry(id).or_default().push(key);
        key
    }

    /// Remove one observer, deleting its set once empty
    ///
    /// Stale keys are ignored.
    pub fn remove(&mut self, key: SlotKey) -> Option<(DeviceId, Arc<dyn Connection>)> {
        let observer = self.observers.remove(key)?;
        if let Some(set) = self.sets.get_mut(&observer.id) {
            set.retain(|k| *k != key);
            if set.is_empty() {
                self.sets.remove(&observer.id);
            }
        }
        Some((observer.id, Arc::clone(observer.outbox.conn())))
    }

    /// Queue `frame` for every observer of `id`
    ///
    /// Returns the keys that took the frame and those whose queue refused it.
    pub fn push(&self, id: &DeviceId, frame: &Bytes) -> (usize, Vec<SlotKey>) {
        let Some(keys) = self.sets.get(id) else {
            return (0, Vec::new());
        };

        let mut queued = 0;
        let mut refused = Vec::new();
        for key in keys {
            let Some(observer) = self.observers.get(*key) else {
                continue;
            };
            match observer.outbox.push(frame.clone()) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::debug!(peer = %observer.outbox.conn().peer(), slot = %key, error = %e, "Observer write failed");
                    refused.push(*key);
                }
            }
        }
        (queued, refused)
    }

    pub fn count(&self, id: &DeviceId) -> usize {
        self.sets.get(id).map(Vec::len).unwrap_or(0)
    }

    pub fn device_count(&self) -> usize {
        self.sets.len()
    }

    pub fn drain(&mut self) -> Vec<Arc<dyn Connection>> {
        self.sets.clear();
        self.observers
            .drain()
            .into_iter()
            .map(|observer| Arc::clone(observer.outbox.conn()))
            .collect()
    }
}

pub struct StreamHub {
    registry: Mutex<ObserverRegistry>,
    closed_tx: mpsc::UnboundedSender<SlotKey>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<SlotKey>>>,
    max_observers_per_device: usize,
}

impl StreamHub {
    pub fn new(max_observers_per_device: usize, write_timeout: Duration) -> Self {
        Self::with_settings(max_observers_per_device, write_timeout, DEFAULT_QUEUE_CAPACITY)
    }

    /// Frames that may wait per observer before it counts as dead
    pub fn with_queue_capacity(self, capacity: usize) -> Self {
        let write_timeout = self.registry.into_inner().settings.write_timeout;
        Self::with_settings(self.max_observers_per_device, write_timeout, capacity)
    }

    fn with_settings(max_observers_per_device: usize, write_timeout: Duration, capacity: usize) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let settings = OutboxSettings {
            capacity,
            write_timeout,
            failed: closed_tx.clone(),
        };
        Self {
            registry: Mutex::new(ObserverRegistry::new(settings)),
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
            max_observers_per_device,
        }
    }

    /// Register a dashboard connection for one device
    ///
    /// Fails with `Unavailable` once the device has the maximum number of
    /// observers.
    pub async fn add_observer(&self, id: DeviceId, conn: Arc<dyn Connection>) -> HubResult<SlotKey> {
        let mut registry = self.registry.lock().await;
        if registry.count(&id) >= self.max_observers_per_device {
            return Err(HubError::Unavailable(format!(
                "too many observers for {} (limit: {})",
                id, self.max_observers_per_device
            )));
        }

        let peer = conn.peer();
        let key = registry.add(id.clone(), conn);
        tracing::info!(event = event::WS_CONN_ADDED, device_id = %id, peer = %peer, slot = %key, "Observer added");
        Ok(key)
    }

    /// Remove an observer that disconnected on its own
    pub async fn remove_observer(&self, key: SlotKey) -> bool {
        let removed = self.registry.lock().await.remove(key);
        match removed {
            Some((id, _conn)) => {
                tracing::info!(event = event::WS_CONN_REMOVED, device_id = %id, slot = %key, "Observer removed");
                true
            }
            None => false,
        }
    }

    pub async fn observer_count(&self, id: &DeviceId) -> usize {
        self.registry.lock().await.count(id)
    }

    pub async fn device_count(&self) -> usize {
        self.registry.lock().await.device_count()
    }

    /// Queue `frame` for every current observer of `id`
    ///
    /// Returns how many observers took the frame.
    pub async fn broadcast(&self, id: &DeviceId, frame: Bytes) -> usize {
        let (queued, refused) = self.registry.lock().await.push(id, &frame);
        if queued == 0 && refused.is_empty() {
            tracing::trace!(device_id = %id, "No observers");
        }
        for key in refused {
            let _ = self.closed_tx.send(key);
        }
        queued
    }

    /// Route one raw data event to the observers of its device
    pub async fn handle_event(&self, raw: Bytes) -> usize {
        let id = match DataChanged::decode(&raw).map(|event| event.device_id()) {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::warn!("Data event without a valid device id dropped");
                return 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed data event dropped");
                return 0;
            }
        };
        self.broadcast(&id, raw).await
    }

    /// Drop an observer whose write failed
    pub async fn reclaim(&self, key: SlotKey) -> bool {
        let removed = self.registry.lock().await.remove(key);
        match removed {
            Some((id, conn)) => {
                conn.close().await;
                tracing::info!(event = event::WS_CONN_REMOVED, device_id = %id, slot = %key, "Dead observer reclaimed");
                true
            }
            None => {
                tracing::trace!(slot = %key, "Stale observer key ignored");
                false
            }
        }
    }

    /// Consume the closed-connections feed until shutdown
    ///
    /// Only the first call gets the feed; later calls return immediately.
    pub async fn reclaim_loop(&self, shutdown: &Shutdown) {
        let Some(mut closed) = self.closed_rx.lock().await.take() else {
            tracing::warn!("Reclaim loop already running");
            return;
        };

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                key = closed.recv() => match key {
                    Some(key) => {
                        self.reclaim(key).await;
                    }
                    None => break,
                },
            }
        }

        *self.closed_rx.lock().await = Some(closed);
    }

    /// Run the data listener and the reclaim loop until shutdown
    pub fn start(
        self: Arc<Self>,
        bus: EventBus,
        topic: String,
        retry: RetryPolicy,
        shutdown: Shutdown,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(topic = %topic, "Stream fan-out started");
            let hub = Arc::clone(&self);
            let listener = bus.listen(&topic, &retry, &shutdown, move |raw: Bytes| {
                let hub = Arc::clone(&hub);
                run_isolated("stream fan-out", async move {
                    hub.handle_event(raw).await;
                })
            });
            tokio::join!(listener, self.reclaim_loop(&shutdown));
            tracing::info!(topic = %topic, "Stream fan-out stopped");
        })
    }

    /// Close and forget every observer
    pub async fn close_all(&self) {
        let drained = self.registry.lock().await.drain();
        for conn in drained {
            conn.close().await;
        }
    }
}
