// WebSocket live feed - decodes pushed sensor_data messages into readings
use crate::application::live_feed::{LiveFeed, ReadingStream};
use crate::domain::sensor::{SensorId, SensorReading};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio_tungstenite::tungstenite::Message;

const SENSOR_DATA: &str = "sensor_data";

#[derive(Debug, Clone)]
pub struct WebSocketFeed {
    url: String,
}

impl WebSocketFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl LiveFeed for WebSocketFeed {
    async fn connect(&self) -> anyhow::Result<ReadingStream> {
        let (mut socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;

        let stream = async_stream::stream! {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => match decode_message(&text) {
                        Ok(Some(readings)) if !readings.is_empty() => {
                            yield Ok(readings);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Ignoring malformed live message: {:#}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("live channel receive failed"));
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[derive(Debug, Deserialize)]
struct LiveEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireReading {
    sensor_id: String,
    #[serde(default)]
    timestamp: Option<serde_json::Number>,
    #[serde(default)]
    crc_valid: Option<bool>,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

/// Timestamps below this are epoch seconds, anything above is milliseconds
const SECONDS_CUTOFF: f64 = 1e11;

fn timestamp_ms(number: &serde_json::Number) -> Option<i64> {
    if let Some(ms) = number.as_i64().filter(|v| (*v as f64) >= SECONDS_CUTOFF) {
        return Some(ms);
    }
    let value = number.as_f64().filter(|v| v.is_finite() && *v >= 0.0)?;
    let ms = if value < SECONDS_CUTOFF { value * 1_000.0 } else { value };
    Some(ms.round() as i64)
}

impl WireReading {
    fn into_reading(self, now_ms: i64) -> Option<SensorReading> {
        let sensor_id: SensorId = match self.sensor_id.parse() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Dropping live reading: {}", e);
                return None;
            }
        };

        if self.crc_valid == Some(false) {
            tracing::debug!("CRC mismatch for {}, skipping live reading", sensor_id);
            return None;
        }

        let metrics: BTreeMap<String, f64> = self
            .fields
            .into_iter()
            .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
            .collect();

        let timestamp_ms = self
            .timestamp
            .as_ref()
            .and_then(timestamp_ms)
            .unwrap_or(now_ms);

        Some(SensorReading::new(sensor_id, metrics, timestamp_ms))
    }
}

/// Decode one entry of a batch; a bad entry is logged and dropped on its own
fn decode_entry(entry: serde_json::Value, now_ms: i64) -> Option<SensorReading> {
    match serde_json::from_value::<WireReading>(entry) {
        Ok(wire) => wire.into_reading(now_ms),
        Err(e) => {
            tracing::warn!("Dropping malformed live reading: {}", e);
            None
        }
    }
}

/// Decode one text frame; `None` for message types other than sensor data
pub fn decode_message(text: &str) -> anyhow::Result<Option<Vec<SensorReading>>> {
    let envelope: LiveEnvelope =
        serde_json::from_str(text).context("Failed to parse live message")?;

    if envelope.kind != SENSOR_DATA {
        tracing::debug!("Ignoring live message of type {}", envelope.kind);
        return Ok(None);
    }

    let entries = match envelope.data {
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(item) => vec![item],
    };

    let now_ms = Utc::now().timestamp_millis();
    Ok(Some(
        entries
            .into_iter()
            .filter_map(|entry| decode_entry(entry, now_ms))
            .collect(),
    ))
}
