//! Data Transfer Objects
//!
//! Request and response types for the API endpoints. The bootstrap and
//! ingest bodies are the same frames devices send over TCP.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::device::{DataPoint, DeviceIdentity, DeviceMeta};

// ============================================
// DEVICE FRAMES
// ============================================

/// First contact of a device
#[derive(Debug, Serialize, Deserialize)]
pub struct BootstrapRequest {
    pub meta: DeviceMeta,
}

/// One data submission
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Unix ms timestamp, defaults to now
    #[serde(default)]
    pub time: Option<i64>,
    pub meta: DeviceMeta,
    /// Kind-specific data document
    pub data: Box<RawValue>,
}

/// Acknowledgement of one device frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    pub descr: String,
}

impl Ack {
    pub fn ok(descr: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            descr: descr.into(),
        }
    }

    pub fn error(descr: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            descr: descr.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// ============================================
// DASHBOARD DTOs
// ============================================

/// A stored data point
#[derive(Debug, Serialize, Deserialize)]
pub struct DataPointDto {
    pub dev_id: String,
    pub time: i64,
    pub data: Box<RawValue>,
}

impl TryFrom<&DataPoint> for DataPointDto {
    type Error = serde_json::Error;

    fn try_from(point: &DataPoint) -> Result<Self, Self::Error> {
        Ok(Self {
            dev_id: point.id.to_string(),
            time: point.time,
            data: serde_json::from_slice(&point.payload)?,
        })
    }
}

/// A known device with its live state
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    #[serde(flatten)]
    pub meta: DeviceMeta,
    pub registered: bool,
    pub connected: bool,
    pub observers: usize,
}

impl DeviceResponse {
    pub fn new(identity: DeviceIdentity, registered: bool, connected: bool, observers: usize) -> Self {
        Self {
            meta: identity.into(),
            registered,
            connected,
            observers,
        }
    }
}

/// Result of a configuration patch
#[derive(Debug, Serialize, Deserialize)]
pub struct PatchResponse {
    pub status: String,
    /// Patch listeners the event reached
    pub listeners: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub connected_devices: usize,
    pub observed_devices: usize,
}
