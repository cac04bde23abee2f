use crate::domain::series::XAxisMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub charts: ChartSettings,
    #[serde(default)]
    pub live: LiveSettings,
    #[serde(default)]
    pub synthetic: SyntheticSettings,
    #[serde(default)]
    pub startup: StartupSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HubSettings {
    pub base_url: String,
    pub discovery_path: String,
    pub value_path: String,
    pub request_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            discovery_path: "/api/sensors/groups".to_string(),
            value_path: "/api/sensors/${type}/${bus}/${channel}".to_string(),
            request_timeout_ms: 2_000,
        }
    }
}

impl HubSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_ms: 2_000 }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartSettings {
    pub capacity: usize,
    pub x_axis: XAxisMode,
    pub max_errors: u32,
    pub recreate_delay_ms: u64,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            capacity: 30,
            x_axis: XAxisMode::Counter,
            max_errors: 5,
            recreate_delay_ms: 1_000,
        }
    }
}

impl ChartSettings {
    pub fn recreate_delay(&self) -> Duration {
        Duration::from_millis(self.recreate_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LiveSettings {
    pub url: Option<String>,
    pub connect_delay_ms: u64,
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            url: None,
            connect_delay_ms: 1_000,
            base_delay_ms: 1_000,
            max_attempts: 5,
        }
    }
}

impl LiveSettings {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyntheticSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub mock_sensors_per_type: u16,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            mock_sensors_per_type: 1,
        }
    }
}

impl SyntheticSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StartupSettings {
    pub ready_timeout_ms: u64,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 5_000,
        }
    }
}

impl StartupSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Load `config/dashboard.*` (optional) overlaid with `DASHBOARD__SECTION__KEY` env vars
pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(config::Environment::with_prefix("DASHBOARD").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in an endpoint path
pub fn prepare_endpoint(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
