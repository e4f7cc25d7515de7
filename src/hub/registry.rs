//! Device Registry
//!
//! Owns the per-device bootstrap state machine:
//!
//! ```text
//! Unknown --bootstrap--> Registered
//! ```
//!
//! The first bootstrap assigns the kind's default configuration; every later
//! bootstrap returns whatever configuration is current.
//!
//! Stored configurations are compact JSON: one line, keys in the order the
//! client sent them. The bytes a device receives on bootstrap, in a pushed
//! patch and through `get_config` are the same.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{HubError, HubResult};
use crate::device::{DeviceConfig, DeviceId, DeviceIdentity, DeviceMeta};
use crate::logging::event;
use crate::store::DeviceStore;

pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    /// Held across the `Unknown -> Registered` transition
    registering: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            registering: Mutex::new(()),
        }
    }

    /// Register a device on first contact and return its configuration
    ///
    /// Unknown kinds and malformed ids are rejected before anything is
    /// written.
    pub async fn bootstrap(&self, meta: &DeviceMeta) -> HubResult<DeviceConfig> {
        let identity = DeviceIdentity::try_from(meta)?;
        self.bootstrap_identity(&identity).await
    }

    pub async fn bootstrap_identity(&self, identity: &DeviceIdentity) -> HubResult<DeviceConfig> {
        self.store.set_identity(identity).await?;

        if self.store.is_registered(&identity.id).await? {
            tracing::debug!(device_id = %identity.id, "Device already registered");
            return Ok(self.store.get_config(&identity.id).await?);
        }

        let _registering = self.registering.lock().await;
        // a concurrent first bootstrap may have finished while we waited
        if self.store.is_registered(&identity.id).await? {
            return Ok(self.store.get_config(&identity.id).await?);
        }

        let config = self.store.get_default_config(identity).await?;
        self.store.set_config(&config).await?;
        self.store.mark_registered(&identity.id).await?;

        tracing::info!(
            event = event::DEV_REGISTERED,
            device_id = %identity.id,
            kind = %identity.kind,
            name = %identity.name,
            "Device registered"
        );
        Ok(config)
    }

    pub async fn get_config(&self, id: &DeviceId) -> HubResult<DeviceConfig> {
        Ok(self.store.get_config(id).await?)
    }

    /// Replace a registered device's configuration
    ///
    /// The payload must decode against the device kind's config schema. It
    /// is stored compacted and the stored form is returned. Nothing is
    /// published.
    pub async fn set_config(&self, config: &DeviceConfig) -> HubResult<DeviceConfig> {
        if !self.store.is_registered(&config.id).await? {
            return Err(HubError::NotFound(format!("device {} is not registered", config.id)));
        }
        let identity = self.store.get_identity(&config.id).await?;
        identity.kind.device().decode_config(&config.payload)?;

        let stored = DeviceConfig::new(config.id.clone(), compact(&config.payload)?);
        self.store.set_config(&stored).await?;
        tracing::debug!(device_id = %stored.id, bytes = stored.payload.len(), "Config updated");
        Ok(stored)
    }

    pub async fn identity(&self, id: &DeviceId) -> HubResult<DeviceIdentity> {
        Ok(self.store.get_identity(id).await?)
    }

    pub async fn list_identities(&self) -> HubResult<Vec<DeviceIdentity>> {
        Ok(self.store.list_identities().await?)
    }

    pub async fn is_registered(&self, id: &DeviceId) -> HubResult<bool> {
        Ok(self.store.is_registered(id).await?)
    }
}

/// Re-serialize a JSON document without insignificant whitespace
fn compact(payload: &[u8]) -> Result<Bytes, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    serde_json::to_vec(&value).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DataPoint, DeviceKind, FridgeConfig};
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> (DeviceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (DeviceRegistry::new(store.clone()), store)
    }

    fn fridge(id: &str) -> DeviceMeta {
        DeviceMeta::new("fridge", "kitchen", id)
    }

    #[tokio::test]
    async fn test_first_bootstrap_assigns_default_config() {
        let (registry, store) = registry();
        let id = DeviceId::parse("AA:BB").unwrap();

        let config = registry.bootstrap(&fridge("AA:BB")).await.unwrap();

        let decoded: FridgeConfig = serde_json::from_slice(&config.payload).unwrap();
        assert_eq!(decoded, FridgeConfig::default());
        assert!(store.is_registered(&id).await.unwrap());
        assert_eq!(registry.get_config(&id).await.unwrap(), config);
    }

    /// Counts config writes and yields inside every registration check so
    /// concurrent bootstraps interleave
    struct CountingStore {
        inner: MemoryStore,
        config_writes: AtomicUsize,
    }

    #[async_trait]
    impl DeviceStore for CountingStore {
        async fn set_identity(&self, identity: &DeviceIdentity) -> StoreResult<()> {
            self.inner.set_identity(identity).await
        }

        async fn get_identity(&self, id: &DeviceId) -> StoreResult<DeviceIdentity> {
            self.inner.get_identity(id).await
        }

        async fn list_identities(&self) -> StoreResult<Vec<DeviceIdentity>> {
            self.inner.list_identities().await
        }

        async fn is_registered(&self, id: &DeviceId) -> StoreResult<bool> {
            tokio::task::yield_now().await;
            self.inner.is_registered(id).await
        }

        async fn mark_registered(&self, id: &DeviceId) -> StoreResult<()> {
            self.inner.mark_registered(id).await
        }

        async fn get_config(&self, id: &DeviceId) -> StoreResult<DeviceConfig> {
            self.inner.get_config(id).await
        }

        async fn set_config(&self, config: &DeviceConfig) -> StoreResult<()> {
            self.config_writes.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.set_config(config).await
        }

        async fn get_default_config(&self, identity: &DeviceIdentity) -> StoreResult<DeviceConfig> {
            self.inner.get_default_config(identity).await
        }

        async fn save_data_point(&self, point: &DataPoint) -> StoreResult<()> {
            self.inner.save_data_point(point).await
        }

        async fn query_data(&self, id: &DeviceId) -> StoreResult<Vec<DataPoint>> {
            self.inner.query_data(id).await
        }

        async fn query_all_data(&self) -> StoreResult<Vec<DataPoint>> {
            self.inner.query_all_data().await
        }

        async fn close(&self) -> StoreResult<()> {
            self.inner.close().await
        }
    }

    fn counting_registry() -> (DeviceRegistry, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            config_writes: AtomicUsize::new(0),
        });
        (DeviceRegistry::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (registry, store) = counting_registry();
        let first = registry.bootstrap(&fridge("AA:BB")).await.unwrap();
        let second = registry.bootstrap(&fridge("AA:BB")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.config_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_bootstraps_register_once() {
        let (registry, store) = counting_registry();
        let meta = fridge("AA:BB");

        let configs = join_all((0..8).map(|_| registry.bootstrap(&meta))).await;

        let configs: Vec<DeviceConfig> = configs.into_iter().map(Result::unwrap).collect();
        assert!(configs.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(store.config_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_racing_first_bootstrap_keeps_patched_config() {
        let (registry, _store) = counting_registry();
        let meta = fridge("AA:BB");
        let id = DeviceId::parse("AA:BB").unwrap();
        let patched = DeviceConfig::new(
            id.clone(),
            &br#"{"turnedOn":false,"streamOn":false,"collectFreq":7,"sendFreq":70}"#[..],
        );

        // patch lands as soon as the device is registered, while the other bootstrap is in flight
        let (first, second, _) = tokio::join!(registry.bootstrap(&meta), registry.bootstrap(&meta), async {
            while !registry.is_registered(&id).await.unwrap() {
                tokio::task::yield_now().await;
            }
            registry.set_config(&patched).await.unwrap();
        });

        first.unwrap();
        second.unwrap();
        assert_eq!(registry.get_config(&id).await.unwrap(), patched);
    }

    #[tokio::test]
    async fn test_set_config_stores_compact_payload() {
        let (registry, _store) = registry();
        registry.bootstrap(&fridge("AA:BB")).await.unwrap();
        let id = DeviceId::parse("AA:BB").unwrap();

        let pretty = "{\n  \"turnedOn\": false,\n  \"streamOn\": true,\n  \"collectFreq\": 3,\n  \"sendFreq\": 9\n}\n";
        let stored = registry
            .set_config(&DeviceConfig::new(id.clone(), pretty.to_string()))
            .await
            .unwrap();

        assert_eq!(
            &stored.payload[..],
            br#"{"turnedOn":false,"streamOn":true,"collectFreq":3,"sendFreq":9}"#
        );
        assert_eq!(registry.get_config(&id).await.unwrap(), stored);
        assert_eq!(registry.bootstrap(&fridge("AA:BB")).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_bootstrap_returns_current_config_after_patch() {
        let (registry, _store) = registry();
        registry.bootstrap(&fridge("AA:BB")).await.unwrap();

        let id = DeviceId::parse("AA:BB").unwrap();
        let patched = DeviceConfig::new(
            id,
            &br#"{"turnedOn":false,"streamOn":false,"collectFreq":5,"sendFreq":50}"#[..],
        );
        registry.set_config(&patched).await.unwrap();

        assert_eq!(registry.bootstrap(&fridge("AA:BB")).await.unwrap(), patched);
    }

    #[tokio::test]
    async fn test_unknown_kind_writes_nothing() {
        let (registry, store) = registry();
        let result = registry
            .bootstrap(&DeviceMeta::new("toaster", "t", "AA:BB"))
            .await;

        assert!(matches!(result, Err(HubError::BadPayload(_))));
        assert!(store.list_identities().await.unwrap().is_empty());
        let id = DeviceId::parse("AA:BB").unwrap();
        assert!(!store.is_registered(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_config_unknown_device() {
        let (registry, _store) = registry();
        let id = DeviceId::parse("ZZ").unwrap();
        assert!(matches!(
            registry.get_config(&id).await,
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_config_requires_bootstrap() {
        let (registry, _store) = registry();
        let config = DeviceConfig::new(DeviceId::parse("ZZ").unwrap(), &b"{}"[..]);
        assert!(matches!(
            registry.set_config(&config).await,
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_config_rejects_wrong_schema() {
        let (registry, _store) = registry();
        registry.bootstrap(&fridge("AA:BB")).await.unwrap();

        let washer_payload = DeviceKind::Washer.device().default_payload().unwrap();
        let config = DeviceConfig::new(DeviceId::parse("AA:BB").unwrap(), washer_payload);
        assert!(matches!(
            registry.set_config(&config).await,
            Err(HubError::BadPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let (registry, store) = registry();
        store.close().await.unwrap();
        assert!(matches!(
            registry.bootstrap(&fridge("AA:BB")).await,
            Err(HubError::Unavailable(_))
        ));
    }
}
