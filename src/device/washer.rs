//! Washer schemas

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{decode, encode, ConfigSchema, DataSchema, Device, DeviceError, DeviceKind};

/// Washer configuration: the wash program currently loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasherConfig {
    pub name: String,
    #[serde(rename = "temp")]
    pub temperature: f32,
    pub wash_time: i64,
    pub wash_turnovers: i64,
    pub rinse_time: i64,
    pub rinse_turnovers: i64,
    pub spin_time: i64,
    pub spin_turnovers: i64,
}

impl WasherConfig {
    pub fn light() -> Self {
        Self {
            name: "LightMode".to_string(),
            temperature: 60.0,
            wash_time: 90,
            wash_turnovers: 240,
            rinse_time: 30,
            rinse_turnovers: 120,
            spin_time: 30,
            spin_turnovers: 60,
        }
    }

    pub fn fast() -> Self {
        Self {
            name: "FastMode".to_string(),
            temperature: 180.0,
            wash_time: 30,
            wash_turnovers: 300,
            rinse_time: 15,
            rinse_turnovers: 240,
            spin_time: 15,
            spin_turnovers: 60,
        }
    }

    pub fn standard() -> Self {
        Self {
            name: "StandardMode".to_string(),
            temperature: 240.0,
            wash_time: 120,
            wash_turnovers: 240,
            rinse_time: 60,
            rinse_turnovers: 180,
            spin_time: 60,
            spin_turnovers: 60,
        }
    }
}

impl Default for WasherConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Drum and water readings keyed by unix ms timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasherData {
    pub turnovers: BTreeMap<i64, i64>,
    pub water_temp: BTreeMap<i64, f32>,
}

pub struct Washer;

impl Device for Washer {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Washer
    }

    fn default_config(&self) -> ConfigSchema {
        ConfigSchema::Washer(WasherConfig::default())
    }

    fn decode_config(&self, payload: &[u8]) -> Result<ConfigSchema, DeviceError> {
        decode(DeviceKind::Washer, "config", payload).map(ConfigSchema::Washer)
    }

    fn encode_config(&self, config: &ConfigSchema) -> Result<Bytes, DeviceError> {
        match config {
            ConfigSchema::Washer(c) => encode(DeviceKind::Washer, "config", c),
            other => Err(DeviceError::SchemaMismatch {
                kind: DeviceKind::Washer,
                got: other.kind(),
            }),
        }
    }

    fn decode_data(&self, payload: &[u8]) -> Result<DataSchema, DeviceError> {
        decode(DeviceKind::Washer, "data", payload).map(DataSchema::Washer)
    }

    fn encode_data(&self, data: &DataSchema) -> Result<Bytes, DeviceError> {
        match data {
            DataSchema::Washer(d) => encode(DeviceKind::Washer, "data", d),
            other => Err(DeviceError::SchemaMismatch {
                kind: DeviceKind::Washer,
                got: other.kind(),
            }),
        }
    }
}
