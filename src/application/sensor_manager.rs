// Sensor manager - discovery, index assignment and per-sensor polling for one sensor type
use crate::application::chart_controller::{
    forward_reading, schedule_recreate, ControllerStatus, SharedController,
};
use crate::application::chart_renderer::RenderError;
use crate::application::sensor_hub::{SensorGroup, SensorHubApi};
use crate::domain::sensor::{SensorDescriptor, SensorId, SensorReading, SensorType};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ManagerState {
    Idle,
    Discovering,
    Polling { sensors: usize },
    Degraded,
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedSensor {
    pub descriptor: SensorDescriptor,
    pub sensor_id: SensorId,
    /// Series index in the paired controller's charts
    pub index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub manager: ManagerState,
    pub tracked: usize,
    pub mock: bool,
    #[serde(flatten)]
    pub controller: ControllerStatus,
}

pub type SharedManager = Arc<Mutex<SensorManager>>;

pub struct SensorManager {
    sensor_type: SensorType,
    hub: Arc<dyn SensorHubApi>,
    controller: SharedController,
    poll_interval: Duration,
    recreate_delay: Duration,
    sensors: Vec<TrackedSensor>,
    mock: bool,
    state: ManagerState,
    polling: Option<CancellationToken>,
}

impl SensorManager {
    pub fn new(
        sensor_type: SensorType,
        hub: Arc<dyn SensorHubApi>,
        controller: SharedController,
        poll_interval: Duration,
        recreate_delay: Duration,
    ) -> Self {
        Self {
            sensor_type,
            hub,
            controller,
            poll_interval,
            recreate_delay,
            sensors: Vec::new(),
            mock: false,
            state: ManagerState::Idle,
            polling: None,
        }
    }

    pub fn into_shared(self) -> SharedManager {
        Arc::new(Mutex::new(self))
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn tracked_sensors(&self) -> &[TrackedSensor] {
        &self.sensors
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// True when the tracked set is the synthetic fallback
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn is_polling(&self) -> bool {
        self.polling.is_some()
    }

    pub async fn state(&self) -> ManagerState {
        self.effective_state(self.controller.read().await.is_degraded())
    }

    /// Manager state next to the paired controller's status
    pub async fn status(&self) -> SensorStatus {
        let controller = self.controller.read().await.status();
        SensorStatus {
            manager: self.effective_state(controller.degraded),
            tracked: self.sensors.len(),
            mock: self.mock,
            controller,
        }
    }

    fn effective_state(&self, degraded: bool) -> ManagerState {
        if degraded {
            ManagerState::Degraded
        } else {
            self.state
        }
    }

    /// Add a sensor unless its id or its bus/channel is already tracked
    pub fn track(&mut self, descriptor: SensorDescriptor) -> bool {
        let sensor_id = descriptor.sensor_id();
        let location = (descriptor.bus, descriptor.channel);
        let duplicate = self.sensors.iter().any(|t| {
            t.sensor_id == sensor_id || (t.descriptor.bus, t.descriptor.channel) == location
        });

        if duplicate {
            tracing::debug!("Ignoring duplicate sensor {}", sensor_id);
            return false;
        }

        let index = self.sensors.len();
        self.sensors.push(TrackedSensor {
            descriptor,
            sensor_id,
            index,
        });
        true
    }

    /// Rebuild the tracked set from a discovery response; indices follow discovery order
    pub async fn apply_discovery(&mut self, groups: &BTreeMap<String, SensorGroup>) -> usize {
        self.state = ManagerState::Discovering;

        let was_polling = self.is_polling();
        self.stop_polling();
        self.sensors.clear();
        self.mock = false;

        for (group, found) in groups {
            let mut matched = 0;
            for descriptor in found.sensors.iter().filter_map(|s| s.descriptor()) {
                if descriptor.sensor_type == self.sensor_type && self.track(descriptor) {
                    matched += 1;
                }
            }
            if matched > 0 {
                tracing::debug!("Group {}: {} {} sensors", group, matched, self.sensor_type);
            }
        }

        tracing::info!("Discovered {} {} sensors", self.sensors.len(), self.sensor_type);
        self.state = ManagerState::Idle;
        self.sync_controller().await;

        if was_polling {
            self.start_polling();
        }
        self.sensors.len()
    }

    /// Discovery fallback: placeholder sensors on bus 0 fed by synthetic data
    pub async fn use_mock_sensors(&mut self, count: u16) {
        self.stop_polling();
        self.sensors.clear();
        self.mock = true;
        for channel in 0..count {
            self.track(SensorDescriptor::new(self.sensor_type, 0, channel, None));
        }
        self.sync_controller().await;
    }

    /// One timer per sensor, each forwarding to the paired controller
    pub fn start_polling(&mut self) {
        self.stop_polling();

        let token = CancellationToken::new();
        for sensor in &self.sensors {
            tokio::spawn(poll_sensor(
                Arc::clone(&self.hub),
                Arc::clone(&self.controller),
                sensor.sensor_id,
                self.poll_interval,
                self.recreate_delay,
                token.clone(),
            ));
        }

        tracing::info!(
            "Polling {} {} sensors every {:?}",
            self.sensors.len(),
            self.sensor_type,
            self.poll_interval
        );
        self.state = ManagerState::Polling {
            sensors: self.sensors.len(),
        };
        self.polling = Some(token);
    }

    pub fn stop_polling(&mut self) {
        if let Some(token) = self.polling.take() {
            token.cancel();
            self.state = ManagerState::Idle;
        }
    }

    /// Manual chart rebuild; resets the paired controller's error budget on success
    pub async fn recreate(&mut self) -> Result<(), RenderError> {
        self.controller.write().await.recreate_chart().await?;
        self.state = ManagerState::Recreated;
        Ok(())
    }

    async fn sync_controller(&mut self) {
        let ids: Vec<SensorId> = self.sensors.iter().map(|t| t.sensor_id).collect();
        let result = self.controller.write().await.assign_sensors(ids).await;
        if let Err(e) = result {
            tracing::warn!("Creating {} charts failed: {}", self.sensor_type, e);
            schedule_recreate(Arc::clone(&self.controller), self.recreate_delay);
        }
    }
}

impl Drop for SensorManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

async fn poll_sensor(
    hub: Arc<dyn SensorHubApi>,
    controller: SharedController,
    sensor_id: SensorId,
    interval: Duration,
    recreate_delay: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // An in-flight request is dropped as soon as polling stops
        let reading = tokio::select! {
            _ = token.cancelled() => break,
            reading = poll_once(hub.as_ref(), sensor_id) => reading,
        };

        if let Some(reading) = reading {
            forward_reading(&controller, reading, recreate_delay).await;
        }
    }

    tracing::debug!("Stopped polling {}", sensor_id);
}

/// Fetch one value; transient failures yield None and never count as chart errors
pub async fn poll_once(hub: &dyn SensorHubApi, sensor_id: SensorId) -> Option<SensorReading> {
    let response = match hub
        .read_sensor(sensor_id.sensor_type, sensor_id.bus, sensor_id.channel)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Reading {} failed: {:#}", sensor_id, e);
            return None;
        }
    };

    if !response.success {
        tracing::debug!("Hub reported failure for {}", sensor_id);
        return None;
    }

    if response.crc_valid() == Some(false) {
        tracing::debug!("CRC mismatch for {}, skipping reading", sensor_id);
        return None;
    }

    let metrics = response.metrics();
    if metrics.is_empty() {
        return None;
    }

    Some(SensorReading::new(
        sensor_id,
        metrics,
        Utc::now().timestamp_millis(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_controller::ChartController;
    use crate::application::chart_renderer::ChartRenderer;
    use crate::application::sensor_hub::SensorValueResponse;
    use crate::domain::chart::ChartSnapshot;
    use crate::infrastructure::chart_board::ChartBoard;
    use crate::infrastructure::config::ChartSettings;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHub {
        groups: Mutex<Option<String>>,
        value: Mutex<Option<String>>,
        reads: AtomicUsize,
    }

    impl FakeHub {
        fn with_groups(json: &str) -> Self {
            let hub = Self::default();
            hub.set_groups(json);
            hub
        }

        fn set_groups(&self, json: &str) {
            *self.groups.lock().unwrap() = Some(json.to_string());
        }

        fn set_value(&self, json: &str) {
            *self.value.lock().unwrap() = Some(json.to_string());
        }
    }

    #[async_trait]
    impl SensorHubApi for FakeHub {
        async fn list_sensor_groups(&self) -> anyhow::Result<BTreeMap<String, SensorGroup>> {
            let json = self.groups.lock().unwrap().clone();
            match json {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => anyhow::bail!("hub unreachable"),
            }
        }

        async fn read_sensor(
            &self,
            _sensor_type: SensorType,
            _bus: u16,
            _channel: u16,
        ) -> anyhow::Result<SensorValueResponse> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let json = self.value.lock().unwrap().clone();
            match json {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => anyhow::bail!("timeout"),
            }
        }
    }

    const GROUPS: &str = r#"{
        "bus_1": {"sensors": [
            {"bus": 1, "mux_channel": 0, "sensor_type": "BH1750"},
            {"bus": 1, "mux_channel": 1, "sensor_type": "SPS30"},
            {"bus": 1, "mux_channel": 2, "sensor_type": "BH1750"}
        ], "count": 3},
        "rescan": {"sensors": [
            {"bus": 1, "mux_channel": 2, "sensor_type": "BH1750"},
            {"bus": 2, "mux_channel": 0, "sensor_type": "bh1750"}
        ], "count": 2}
    }"#;

    async fn discover(manager: &mut SensorManager, hub: &FakeHub) -> usize {
        let groups = hub.list_sensor_groups().await.unwrap();
        manager.apply_discovery(&groups).await
    }

    fn manager(hub: Arc<FakeHub>) -> (SensorManager, SharedController) {
        let controller = ChartController::new(
            SensorType::Bh1750,
            ChartSettings::default(),
            Arc::new(ChartBoard::new()),
        )
        .into_shared();
        let manager = SensorManager::new(
            SensorType::Bh1750,
            hub,
            Arc::clone(&controller),
            Duration::from_secs(1),
            Duration::from_millis(100),
        );
        (manager, controller)
    }

    #[tokio::test]
    async fn test_discovery_assigns_positional_indices() {
        let hub = Arc::new(FakeHub::with_groups(GROUPS));
        let (mut manager, controller) = manager(Arc::clone(&hub));

        assert_eq!(discover(&mut manager, &hub).await, 3);

        let ids: Vec<String> = manager
            .tracked_sensors()
            .iter()
            .map(|t| format!("{}@{}", t.sensor_id, t.index))
            .collect();
        assert_eq!(ids, vec!["bh1750_1_0@0", "bh1750_1_2@1", "bh1750_2_0@2"]);

        let guard = controller.read().await;
        assert!(guard.is_ready());
        assert_eq!(guard.sensors().len(), 3);
        assert_eq!(guard.series_index(&"bh1750_1_2".parse().unwrap()), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_location_is_rejected() {
        let (mut manager, _) = manager(Arc::new(FakeHub::default()));

        assert!(manager.track(SensorDescriptor::new(SensorType::Bh1750, 1, 4, Some(0x23))));
        assert!(!manager.track(SensorDescriptor::new(SensorType::Bh1750, 1, 4, Some(0x5c))));
        assert!(!manager.track(SensorDescriptor::new(SensorType::Sps30, 1, 4, None)));
        assert_eq!(manager.sensor_count(), 1);
    }

    #[tokio::test]
    async fn test_rediscovery_rebuilds_the_set() {
        let hub = Arc::new(FakeHub::with_groups(GROUPS));
        let (mut manager, controller) = manager(Arc::clone(&hub));
        discover(&mut manager, &hub).await;

        hub.set_groups(r#"{"bus_2": {"sensors": [{"bus": 2, "mux_channel": 0, "sensor_type": "BH1750"}], "count": 1}}"#);
        assert_eq!(discover(&mut manager, &hub).await, 1);
        assert_eq!(manager.tracked_sensors()[0].index, 0);
        assert_eq!(controller.read().await.charts()[0].series_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_sensors_and_manual_recreate() {
        let (mut manager, controller) = manager(Arc::new(FakeHub::default()));
        assert!(!controller.read().await.is_ready());

        manager.use_mock_sensors(2).await;
        assert!(manager.is_mock());
        assert_eq!(controller.read().await.sensors().len(), 2);

        manager.recreate().await.unwrap();
        let status = manager.status().await;
        assert_eq!(status.manager, ManagerState::Recreated);
        assert_eq!(status.tracked, 2);
        assert!(status.mock);
        assert_eq!(status.controller.consecutive_errors, 0);
    }

    struct DetachedRenderer;

    #[async_trait]
    impl ChartRenderer for DetachedRenderer {
        async fn create_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError> {
            Err(RenderError::Detached(chart.id))
        }

        async fn update_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError> {
            Err(RenderError::Detached(chart.id))
        }

        async fn destroy_chart(&self, _chart_id: &str) {}
    }

    #[tokio::test]
    async fn test_exhausted_budget_reports_degraded() {
        let controller =
            ChartController::new(SensorType::Bh1750, ChartSettings::default(), Arc::new(DetachedRenderer))
                .into_shared();
        let mut manager = SensorManager::new(
            SensorType::Bh1750,
            Arc::new(FakeHub::default()),
            Arc::clone(&controller),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );

        manager.use_mock_sensors(1).await;
        assert_eq!(manager.state().await, ManagerState::Idle);

        for _ in 0..4 {
            assert!(manager.recreate().await.is_err());
        }
        assert_eq!(manager.state().await, ManagerState::Degraded);
        assert!(manager.status().await.controller.degraded);
    }

    #[tokio::test]
    async fn test_crc_failure_is_skipped_without_counting_an_error() {
        let hub = Arc::new(FakeHub::with_groups(GROUPS));
        let (mut manager, controller) = manager(Arc::clone(&hub));
        discover(&mut manager, &hub).await;
        let id: SensorId = "bh1750_1_0".parse().unwrap();

        hub.set_value(r#"{"success": true, "data": {"light": 512.0, "crc_valid": false}}"#);
        assert!(poll_once(hub.as_ref(), id).await.is_none());

        hub.set_value(r#"{"success": false, "data": {}}"#);
        assert!(poll_once(hub.as_ref(), id).await.is_none());

        let guard = controller.read().await;
        assert_eq!(guard.error_count(), 0);
        assert!(guard.charts()[0].series(0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_once_builds_reading() {
        let hub = Arc::new(FakeHub::default());
        hub.set_value(r#"{"success": true, "data": {"light": 512.0, "crc_valid": true}}"#);

        let reading = poll_once(hub.as_ref(), "bh1750_1_0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reading.metric("light"), Some(512.0));
        assert_eq!(reading.metrics.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_feeds_chart_until_stopped() {
        let hub = Arc::new(FakeHub::with_groups(GROUPS));
        hub.set_value(r#"{"success": true, "data": {"light": 300.0}}"#);
        let (mut manager, controller) = manager(Arc::clone(&hub));
        discover(&mut manager, &hub).await;

        manager.start_polling();
        assert_eq!(manager.state().await, ManagerState::Polling { sensors: 3 });
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        {
            let guard = controller.read().await;
            for index in 0..3 {
                assert!(guard.charts()[0].series(index).unwrap().len() >= 2);
            }
        }

        manager.stop_polling();
        let reads = hub.reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hub.reads.load(Ordering::SeqCst), reads);
        assert!(!manager.is_polling());
    }
}
