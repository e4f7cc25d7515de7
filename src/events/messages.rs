//! Event payloads carried on the bus
//!
//! Both events embed the device payload verbatim as raw JSON, so whatever
//! bytes were persisted are the bytes a subscriber forwards.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::device::{DataPoint, DeviceConfig, DeviceId, DeviceIdentity, DeviceMeta};

/// Topic for configuration patches
pub const DEFAULT_PATCH_TOPIC: &str = "cfg.patched";

/// Topic for ingested device data
pub const DEFAULT_DATA_TOPIC: &str = "dev.data";

/// A configuration change that should reach the device's live connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub id: DeviceId,
    pub data: Box<RawValue>,
}

impl ConfigPatch {
    pub fn new(config: &DeviceConfig) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: config.id.clone(),
            data: serde_json::from_slice(&config.payload)?,
        })
    }

    /// The configuration bytes to write to the device
    pub fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(self.data.get().as_bytes())
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// A data submission that was persisted for a device
///
/// This is also the exact frame observers receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataChanged {
    /// Unix timestamp in milliseconds
    pub time: i64,
    pub meta: DeviceMeta,
    pub data: Box<RawValue>,
}

impl DataChanged {
    pub fn new(identity: &DeviceIdentity, point: &DataPoint) -> Result<Self, serde_json::Error> {
        Ok(Self {
            time: point.time,
            meta: identity.clone().into(),
            data: serde_json::from_slice(&point.payload)?,
        })
    }

    /// Id of the device the data belongs to, if it is well-formed
    pub fn device_id(&self) -> Option<DeviceId> {
        DeviceId::parse(self.meta.dev_id.as_str()).ok()
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}
