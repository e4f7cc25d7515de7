//! Data Ingestor

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

use super::HubResult;
use crate::device::{DataPoint, DeviceId, DeviceIdentity, DeviceMeta};
use crate::events::{DataChanged, EventBus};
use crate::store::DeviceStore;

/// Persists device data and announces it on the bus
pub struct DataIngestor {
    store: Arc<dyn DeviceStore>,
    bus: EventBus,
    topic: String,
}

impl DataIngestor {
    pub fn new(store: Arc<dyn DeviceStore>, bus: EventBus, topic: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            topic: topic.into(),
        }
    }

    /// Accept one data submission
    ///
    /// `time` defaults to now. The point is persisted before the event is
    /// published; a failed publish is logged and does not fail the call.
    pub async fn ingest(&self, meta: &DeviceMeta, payload: Bytes, time: Option<i64>) -> HubResult<DataPoint> {
        let identity = DeviceIdentity::try_from(meta)?;
        identity.kind.device().decode_data(&payload)?;

        let time = time.unwrap_or_else(|| Utc::now().timestamp_millis());
        let point = DataPoint::with_time(identity.id.clone(), payload, time);
        let event = DataChanged::new(&identity, &point)?.encode()?;

        self.store.save_data_point(&point).await?;

        match self.bus.publish(&self.topic, event).await {
            Ok(observers) => {
                tracing::debug!(device_id = %identity.id, time, observers, "Data ingested");
            }
            Err(e) => {
                tracing::warn!(device_id = %identity.id, error = %e, "Data persisted but not published");
            }
        }

        Ok(point)
    }

    /// Data history of one device, oldest first
    pub async fn history(&self, id: &DeviceId) -> HubResult<Vec<DataPoint>> {
        Ok(self.store.query_data(id).await?)
    }

    pub async fn history_all(&self) -> HubResult<Vec<DataPoint>> {
        Ok(self.store.query_all_data().await?)
    }
}
