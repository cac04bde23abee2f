// Sensor hub trait - discovery and per-sensor value access
use crate::domain::sensor::{SensorDescriptor, SensorType};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// One group of the discovery response
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SensorGroup {
    #[serde(default)]
    pub sensors: Vec<DiscoveredSensor>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredSensor {
    pub bus: u16,
    pub mux_channel: u16,
    #[serde(default)]
    pub address: Option<u16>,
    pub sensor_type: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl DiscoveredSensor {
    /// None when the type tag is not one we chart
    pub fn descriptor(&self) -> Option<SensorDescriptor> {
        let sensor_type = SensorType::from_prefix(&self.sensor_type)?;
        Some(SensorDescriptor::new(
            sensor_type,
            self.bus,
            self.mux_channel,
            self.address,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorValueResponse {
    pub success: bool,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl SensorValueResponse {
    pub fn crc_valid(&self) -> Option<bool> {
        self.data.get("crc_valid").and_then(|v| v.as_bool())
    }

    /// Numeric fields of `data`, excluding the CRC flag
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.data
            .iter()
            .filter(|(key, _)| key.as_str() != "crc_valid")
            .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
            .collect()
    }
}

#[async_trait]
pub trait SensorHubApi: Send + Sync {
    /// Group name to discovered sensors, groups in name order
    async fn list_sensor_groups(&self) -> anyhow::Result<BTreeMap<String, SensorGroup>>;

    /// Latest value of one sensor
    async fn read_sensor(
        &self,
        sensor_type: SensorType,
        bus: u16,
        channel: u16,
    ) -> anyhow::Result<SensorValueResponse>;
}
