//! Fridge schemas

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{decode, encode, ConfigSchema, DataSchema, Device, DeviceError, DeviceKind};

/// Fridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FridgeConfig {
    pub turned_on: bool,
    pub stream_on: bool,
    /// Sampling period in milliseconds
    pub collect_freq: i64,
    /// Upload period in milliseconds
    pub send_freq: i64,
}

impl Default for FridgeConfig {
    fn default() -> Self {
        Self {
            turned_on: true,
            stream_on: true,
            collect_freq: 1000,
            send_freq: 5000,
        }
    }
}

/// Temperature samples per compartment, keyed by unix ms timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FridgeData {
    #[serde(rename = "tempCam1")]
    pub temp_cam1: BTreeMap<i64, f32>,
    #[serde(rename = "tempCam2")]
    pub temp_cam2: BTreeMap<i64, f32>,
}

pub struct Fridge;

impl Device for Fridge {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Fridge
    }

    fn default_config(&self) -> ConfigSchema {
        ConfigSchema::Fridge(FridgeConfig::default())
    }

    fn decode_config(&self, payload: &[u8]) -> Result<ConfigSchema, DeviceError> {
        decode(DeviceKind::Fridge, "config", payload).map(ConfigSchema::Fridge)
    }

    fn encode_config(&self, config: &ConfigSchema) -> Result<Bytes, DeviceError> {
        match config {
            ConfigSchema::Fridge(c) => encode(DeviceKind::Fridge, "config", c),
            other => Err(DeviceError::SchemaMismatch {
                kind: DeviceKind::Fridge,
                got: other.kind(),
            }),
        }
    }

    fn decode_data(&self, payload: &[u8]) -> Result<DataSchema, DeviceError> {
        decode(DeviceKind::Fridge, "data", payload).map(DataSchema::Fridge)
    }

    fn encode_data(&self, data: &DataSchema) -> Result<Bytes, DeviceError> {
        match data {
            DataSchema::Fridge(d) => encode(DeviceKind::Fridge, "data", d),
            other => Err(DeviceError::SchemaMismatch {
                kind: DeviceKind::Fridge,
                got: other.kind(),
            }),
        }
    }
}
