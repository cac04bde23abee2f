// HTTP sensor hub client
use crate::application::sensor_hub::{SensorGroup, SensorHubApi, SensorValueResponse};
use crate::domain::sensor::SensorType;
use crate::infrastructure::config::{prepare_endpoint, HubSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct HttpSensorHub {
    client: reqwest::Client,
    base_url: String,
    discovery_path: String,
    value_path: String,
}

impl HttpSensorHub {
    pub fn new(settings: &HubSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build sensor hub HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            discovery_path: settings.discovery_path.clone(),
            value_path: settings.value_path.clone(),
        })
    }

    fn discovery_url(&self) -> String {
        format!("{}{}", self.base_url, self.discovery_path)
    }

    fn value_url(&self, sensor_type: SensorType, bus: u16, channel: u16) -> String {
        let mut vars = HashMap::new();
        vars.insert(
            "type".to_string(),
            urlencoding::encode(sensor_type.prefix()).into_owned(),
        );
        vars.insert("bus".to_string(), bus.to_string());
        vars.insert("channel".to_string(), channel.to_string());

        format!("{}{}", self.base_url, prepare_endpoint(&self.value_path, &vars))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sensor hub request failed with status {}: {}", status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl SensorHubApi for HttpSensorHub {
    async fn list_sensor_groups(&self) -> Result<BTreeMap<String, SensorGroup>> {
        self.get_json(&self.discovery_url()).await
    }

    async fn read_sensor(
        &self,
        sensor_type: SensorType,
        bus: u16,
        channel: u16,
    ) -> Result<SensorValueResponse> {
        self.get_json(&self.value_url(sensor_type, bus, channel)).await
    }
}
