// Sensor domain models
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A metric exposed by a sensor type (one chart per metric)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub key: &'static str,
    pub title: &'static str,
    pub unit: &'static str,
}

const fn metric(key: &'static str, title: &'static str, unit: &'static str) -> MetricSpec {
    MetricSpec { key, title, unit }
}

const BH1750_METRICS: &[MetricSpec] = &[metric("light", "Light", "lx")];

const BME688_METRICS: &[MetricSpec] = &[
    metric("temperature", "Temperature", "°C"),
    metric("humidity", "Humidity", "%"),
    metric("pressure", "Pressure", "hPa"),
    metric("gas_resistance", "Gas Resistance", "kΩ"),
];

const SDP810_METRICS: &[MetricSpec] = &[
    metric("differential_pressure", "Differential Pressure", "Pa"),
    metric("temperature", "Temperature", "°C"),
];

const SPS30_METRICS: &[MetricSpec] = &[
    metric("pm1_0", "PM1.0", "µg/m³"),
    metric("pm2_5", "PM2.5", "µg/m³"),
    metric("pm4_0", "PM4.0", "µg/m³"),
    metric("pm10", "PM10", "µg/m³"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Bh1750,
    Bme688,
    Sdp810,
    Sps30,
}

impl SensorType {
    pub const ALL: [SensorType; 4] = [
        SensorType::Bh1750,
        SensorType::Bme688,
        SensorType::Sdp810,
        SensorType::Sps30,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            SensorType::Bh1750 => "bh1750",
            SensorType::Bme688 => "bme688",
            SensorType::Sdp810 => "sdp810",
            SensorType::Sps30 => "sps30",
        }
    }

    /// Match a prefix or discovery tag, case-insensitively
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.prefix().eq_ignore_ascii_case(prefix.trim()))
    }

    pub fn metrics(&self) -> &'static [MetricSpec] {
        match self {
            SensorType::Bh1750 => BH1750_METRICS,
            SensorType::Bme688 => BME688_METRICS,
            SensorType::Sdp810 => SDP810_METRICS,
            SensorType::Sps30 => SPS30_METRICS,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorIdError {
    #[error("unknown sensor type prefix in '{0}'")]
    UnknownPrefix(String),
    #[error("malformed sensor id '{0}', expected <type>_<bus>_<channel>")]
    Malformed(String),
}

/// Identity of a physical sensor: `<type>_<bus>_<channel>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId {
    pub sensor_type: SensorType,
    pub bus: u16,
    pub channel: u16,
}

impl SensorId {
    pub fn new(sensor_type: SensorType, bus: u16, channel: u16) -> Self {
        Self {
            sensor_type,
            bus,
            channel,
        }
    }

    pub fn location(&self) -> (u16, u16) {
        (self.bus, self.channel)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.sensor_type.prefix(), self.bus, self.channel)
    }
}

impl FromStr for SensorId {
    type Err = SensorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Bus and channel are the last two segments; the prefix is everything before
        let mut parts = s.rsplitn(3, '_');
        let channel = parts.next();
        let bus = parts.next();
        let prefix = parts.next();

        let (Some(prefix), Some(bus), Some(channel)) = (prefix, bus, channel) else {
            return Err(SensorIdError::Malformed(s.to_string()));
        };

        let sensor_type =
            SensorType::from_prefix(prefix).ok_or_else(|| SensorIdError::UnknownPrefix(s.to_string()))?;
        let bus = bus
            .parse()
            .map_err(|_| SensorIdError::Malformed(s.to_string()))?;
        let channel = channel
            .parse()
            .map_err(|_| SensorIdError::Malformed(s.to_string()))?;

        Ok(Self::new(sensor_type, bus, channel))
    }
}

impl Serialize for SensorId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A sensor found by discovery; never mutated once indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorDescriptor {
    pub bus: u16,
    pub channel: u16,
    pub address: Option<u16>,
    pub sensor_type: SensorType,
}

impl SensorDescriptor {
    pub fn new(sensor_type: SensorType, bus: u16, channel: u16, address: Option<u16>) -> Self {
        Self {
            bus,
            channel,
            address,
            sensor_type,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        SensorId::new(self.sensor_type, self.bus, self.channel)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp_ms: i64,
}

impl SensorReading {
    pub fn new(sensor_id: SensorId, metrics: BTreeMap<String, f64>, timestamp_ms: i64) -> Self {
        Self {
            sensor_id,
            metrics,
            timestamp_ms,
        }
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_id.sensor_type
    }
}
