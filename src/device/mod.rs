//! Device Model
//!
//! Core data types shared by every part of the hub:
//!
//! - `DeviceId`: validated stable hardware address
//! - `DeviceIdentity`: a device's kind, display name and id
//! - `DeviceConfig`: opaque, kind-specific configuration blob
//! - `DataPoint`: one ingestion submission
//!
//! Device kinds form a closed set ([`DeviceKind`]). Each kind is backed by a
//! [`Device`] implementation that knows the kind's configuration and data
//! schemas. Adding a kind means adding one variant and one implementation;
//! the hub itself never matches on kinds.

mod fridge;
mod washer;

pub use fridge::{Fridge, FridgeConfig, FridgeData};
pub use washer::{Washer, WasherConfig, WasherData};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted length of a device id
pub const MAX_ID_LEN: usize = 64;

/// Errors raised while interpreting device identities and payloads
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Unknown device type: {0}")]
    UnknownKind(String),

    #[error("Invalid device id: {0}")]
    InvalidId(String),

    #[error("Invalid {kind} {schema}: {source}")]
    Decode {
        kind: DeviceKind,
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {kind} {schema}: {source}")]
    Encode {
        kind: DeviceKind,
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Schema mismatch: {kind} cannot encode a {got} payload")]
    SchemaMismatch { kind: DeviceKind, got: DeviceKind },
}

/// The closed set of supported appliance kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Fridge,
    Washer,
}

impl DeviceKind {
    /// Get all kinds for iteration
    pub fn all() -> &'static [DeviceKind] {
        &[DeviceKind::Fridge, DeviceKind::Washer]
    }

    /// The schema implementation for this kind
    pub fn device(self) -> &'static dyn Device {
        match self {
            DeviceKind::Fridge => &Fridge,
            DeviceKind::Washer => &Washer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Fridge => "fridge",
            DeviceKind::Washer => "washer",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fridge" => Ok(DeviceKind::Fridge),
            "washer" => Ok(DeviceKind::Washer),
            _ => Err(DeviceError::UnknownKind(s.to_string())),
        }
    }
}

/// Stable hardware address of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Validate and wrap a raw id
    pub fn parse(raw: impl Into<String>) -> Result<Self, DeviceError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(DeviceError::InvalidId("id cannot be empty".to_string()));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(DeviceError::InvalidId(format!(
                "id exceeds maximum length of {} characters",
                MAX_ID_LEN
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(DeviceError::InvalidId(format!(
                "'{}' contains whitespace or '/'",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Device metadata as it arrives on the wire, before validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceMeta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub dev_id: String,
}

impl DeviceMeta {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, dev_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            dev_id: dev_id.into(),
        }
    }
}

/// A validated physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DeviceMeta", into = "DeviceMeta")]
pub struct DeviceIdentity {
    pub kind: DeviceKind,
    pub name: String,
    pub id: DeviceId,
}

impl DeviceIdentity {
    pub fn new(kind: DeviceKind, name: impl Into<String>, id: DeviceId) -> Self {
        Self {
            kind,
            name: name.into(),
            id,
        }
    }
}

impl TryFrom<DeviceMeta> for DeviceIdentity {
    type Error = DeviceError;

    fn try_from(meta: DeviceMeta) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: meta.kind.parse()?,
            name: meta.name,
            id: DeviceId::parse(meta.dev_id)?,
        })
    }
}

impl TryFrom<&DeviceMeta> for DeviceIdentity {
    type Error = DeviceError;

    fn try_from(meta: &DeviceMeta) -> Result<Self, Self::Error> {
        Self::try_from(meta.clone())
    }
}

impl From<DeviceIdentity> for DeviceMeta {
    fn from(identity: DeviceIdentity) -> Self {
        Self {
            kind: identity.kind.to_string(),
            name: identity.name,
            dev_id: identity.id.into(),
        }
    }
}

/// Opaque, kind-specific configuration of one device
///
/// The payload is serialized JSON that has passed structural decoding
/// against the owning device's config schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub payload: Bytes,
}

impl DeviceConfig {
    pub fn new(id: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// A single data submission from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPoint {
    pub id: DeviceId,
    /// Unix timestamp in milliseconds
    pub time: i64,
    pub payload: Bytes,
}

impl DataPoint {
    /// Create a data point stamped with the current time
    pub fn new(id: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::with_time(id, payload, Utc::now().timestamp_millis())
    }

    pub fn with_time(id: DeviceId, payload: impl Into<Bytes>, time: i64) -> Self {
        Self {
            id,
            time,
            payload: payload.into(),
        }
    }
}

/// Decoded configuration, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSchema {
    Fridge(FridgeConfig),
    Washer(WasherConfig),
}

impl ConfigSchema {
    pub fn kind(&self) -> DeviceKind {
        match self {
            ConfigSchema::Fridge(_) => DeviceKind::Fridge,
            ConfigSchema::Washer(_) => DeviceKind::Washer,
        }
    }
}

/// Decoded data submission, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum DataSchema {
    Fridge(FridgeData),
    Washer(WasherData),
}

impl DataSchema {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DataSchema::Fridge(_) => DeviceKind::Fridge,
            DataSchema::Washer(_) => DeviceKind::Washer,
        }
    }
}

/// Capability interface implemented once per device kind
pub trait Device: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Configuration assigned to a device on first bootstrap
    fn default_config(&self) -> ConfigSchema;

    fn decode_config(&self, payload: &[u8]) -> Result<ConfigSchema, DeviceError>;

    fn encode_config(&self, config: &ConfigSchema) -> Result<Bytes, DeviceError>;

    fn decode_data(&self, payload: &[u8]) -> Result<DataSchema, DeviceError>;

    fn encode_data(&self, data: &DataSchema) -> Result<Bytes, DeviceError>;

    /// Serialized default configuration
    fn default_payload(&self) -> Result<Bytes, DeviceError> {
        self.encode_config(&self.default_config())
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    kind: DeviceKind,
    schema: &'static str,
    payload: &[u8],
) -> Result<T, DeviceError> {
    serde_json::from_slice(payload).map_err(|source| DeviceError::Decode {
        kind,
        schema,
        source,
    })
}

pub(crate) fn encode<T: Serialize>(
    kind: DeviceKind,
    schema: &'static str,
    value: &T,
) -> Result<Bytes, DeviceError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| DeviceError::Encode {
            kind,
            schema,
            source,
        })
}
