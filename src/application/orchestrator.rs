// Dashboard orchestrator - startup stages, data sources and the live channel
use crate::application::live_feed::{backoff_delay, LiveFeed};
use crate::application::registry::ControllerRegistry;
use crate::application::sensor_hub::SensorHubApi;
use crate::application::sensor_manager::{SensorManager, SharedManager};
use crate::domain::sensor::SensorType;
use crate::infrastructure::config::DashboardConfig;
use crate::infrastructure::synthetic::SyntheticGenerator;
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveExit {
    Cancelled,
    Exhausted,
}

pub struct DashboardOrchestrator {
    config: DashboardConfig,
    registry: ControllerRegistry,
    hub: Arc<dyn SensorHubApi>,
    managers: BTreeMap<SensorType, SharedManager>,
    live_feed: Option<Arc<dyn LiveFeed>>,
    synthetic: Option<CancellationToken>,
}

impl DashboardOrchestrator {
    pub fn new(
        config: DashboardConfig,
        registry: ControllerRegistry,
        hub: Arc<dyn SensorHubApi>,
        live_feed: Option<Arc<dyn LiveFeed>>,
    ) -> Self {
        let managers = registry
            .sensor_types()
            .filter_map(|sensor_type| {
                let controller = registry.get(sensor_type)?;
                let manager = SensorManager::new(
                    sensor_type,
                    Arc::clone(&hub),
                    controller,
                    config.polling.interval(),
                    config.charts.recreate_delay(),
                );
                Some((sensor_type, manager.into_shared()))
            })
            .collect();

        Self {
            config,
            registry,
            hub,
            managers,
            live_feed,
            synthetic: None,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Shared handles for the HTTP layer
    pub fn managers(&self) -> BTreeMap<SensorType, SharedManager> {
        self.managers.clone()
    }

    #[cfg(test)]
    pub fn is_synthetic_running(&self) -> bool {
        self.synthetic.is_some()
    }

    /// Run every startup stage, then keep data flowing until `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Stage synthetic-preview");
        self.start_synthetic(&shutdown);

        tracing::info!("Stage discovery");
        let discovered = self.discover_all().await;

        tracing::info!("Stage readiness");
        let timeout = self.config.startup.ready_timeout();
        if !self.registry.wait_until_ready(timeout).await {
            tracing::warn!("Not every chart became ready within {:?}", timeout);
        }

        tracing::info!("Stage polling ({} sensors discovered)", discovered);
        let polled = self.begin_polling().await;

        if let Some(feed) = self.live_feed.clone() {
            tracing::info!("Stage live-channel");
            let exit = tokio::select! {
                _ = shutdown.cancelled() => LiveExit::Cancelled,
                _ = tokio::time::sleep(self.config.live.connect_delay()) => {
                    self.run_live_channel(feed, &shutdown).await
                }
            };

            if exit == LiveExit::Exhausted {
                if polled > 0 {
                    tracing::warn!("Live channel unavailable, staying on HTTP polling");
                } else {
                    tracing::warn!("Live channel unavailable, falling back to synthetic data");
                    self.start_synthetic(&shutdown);
                }
            }
        }

        shutdown.cancelled().await;
        self.shutdown().await;
        tracing::info!("Orchestrator stopped");
    }

    /// Fetch the sensor groups once and hand them to every manager;
    /// a failed fetch falls back to mock sensors
    pub async fn discover_all(&mut self) -> usize {
        let groups = match self.hub.list_sensor_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("Sensor discovery failed: {:#}; using synthetic data", e);
                let mock_count = self.config.synthetic.mock_sensors_per_type;
                for manager in self.managers.values() {
                    manager.lock().await.use_mock_sensors(mock_count).await;
                }
                return 0;
            }
        };

        let mut discovered = 0;
        for manager in self.managers.values() {
            discovered += manager.lock().await.apply_discovery(&groups).await;
        }
        discovered
    }

    /// Poll every manager tracking real sensors; synthetic data stops once any are polled
    pub async fn begin_polling(&mut self) -> usize {
        let mut polled = 0;
        for manager in self.managers.values() {
            let mut manager = manager.lock().await;
            if !manager.is_mock() && manager.sensor_count() > 0 {
                manager.start_polling();
                polled += manager.sensor_count();
            }
        }

        if polled > 0 {
            self.stop_synthetic("polling real sensors");
        }
        polled
    }

    pub fn start_synthetic(&mut self, shutdown: &CancellationToken) {
        if !self.config.synthetic.enabled || self.synthetic.is_some() {
            return;
        }

        let token = shutdown.child_token();
        tokio::spawn(run_synthetic(
            self.registry.clone(),
            self.config.synthetic.interval(),
            self.config.synthetic.mock_sensors_per_type,
            token.clone(),
        ));
        tracing::info!("Synthetic data generation started");
        self.synthetic = Some(token);
    }

    pub fn stop_synthetic(&mut self, reason: &str) {
        if let Some(token) = self.synthetic.take() {
            tracing::info!("Synthetic data generation stopped: {}", reason);
            token.cancel();
        }
    }

    /// Connect and route live batches, reconnecting with linear backoff
    pub async fn run_live_channel(
        &mut self,
        feed: Arc<dyn LiveFeed>,
        shutdown: &CancellationToken,
    ) -> LiveExit {
        let max_attempts = self.config.live.max_attempts;
        let base_delay = self.config.live.base_delay();
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = shutdown.cancelled() => return LiveExit::Cancelled,
                connected = feed.connect() => connected,
            };

            match connected {
                Ok(mut stream) => {
                    tracing::info!("Live channel connected");
                    attempt = 0;

                    loop {
                        let next = tokio::select! {
                            _ = shutdown.cancelled() => return LiveExit::Cancelled,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(readings)) => {
                                let summary = self.registry.route_all(readings).await;
                                // Readings for sensors the charts don't know keep synthetic data on
                                if summary.applied > 0 {
                                    self.stop_synthetic("live data applied");
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Live channel error: {:#}", e);
                                break;
                            }
                            None => {
                                tracing::info!("Live channel closed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Live channel connect failed: {:#}", e),
            }

            attempt += 1;
            if attempt > max_attempts {
                tracing::warn!("Live channel gave up after {} attempts", max_attempts);
                return LiveExit::Exhausted;
            }

            let delay = backoff_delay(attempt, base_delay);
            tracing::debug!("Reconnecting live channel in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                _ = shutdown.cancelled() => return LiveExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_synthetic("shutdown");
        for manager in self.managers.values() {
            manager.lock().await.stop_polling();
        }
    }
}

async fn run_synthetic(
    registry: ControllerRegistry,
    interval: Duration,
    mock_count: u16,
    token: CancellationToken,
) {
    let mut generator = SyntheticGenerator::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let targets = registry.synthetic_targets(mock_count).await;
        let batch = generator.batch(&targets, Utc::now().timestamp_millis());
        registry.route_all(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_controller::ChartController;
    use crate::application::live_feed::ReadingStream;
    use crate::application::sensor_hub::{SensorGroup, SensorValueResponse};
    use crate::domain::sensor::{SensorId, SensorReading};
    use crate::infrastructure::chart_board::ChartBoard;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Hub with fixed discovery JSON; None makes it unreachable
    struct TestHub {
        groups: Option<&'static str>,
        listings: AtomicUsize,
    }

    impl TestHub {
        fn new(groups: Option<&'static str>) -> Self {
            Self {
                groups,
                listings: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SensorHubApi for TestHub {
        async fn list_sensor_groups(&self) -> anyhow::Result<BTreeMap<String, SensorGroup>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            match self.groups {
                Some(json) => Ok(serde_json::from_str(json)?),
                None => anyhow::bail!("connection refused"),
            }
        }

        async fn read_sensor(
            &self,
            _sensor_type: SensorType,
            _bus: u16,
            _channel: u16,
        ) -> anyhow::Result<SensorValueResponse> {
            match self.groups {
                Some(_) => Ok(serde_json::from_str(r#"{"success": true, "data": {"light": 300.0}}"#)?),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    enum Script {
        Refuse,
        /// Deliver the batches, stay connected for `hold`, then close
        Open {
            batches: Vec<Vec<SensorReading>>,
            hold: Duration,
        },
    }

    #[derive(Default)]
    struct ScriptedFeed {
        scripts: Mutex<VecDeque<Script>>,
        connects: AtomicUsize,
    }

    impl ScriptedFeed {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LiveFeed for ScriptedFeed {
        async fn connect(&self) -> anyhow::Result<ReadingStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Open { batches, hold }) => {
                    let stream = async_stream::stream! {
                        for batch in batches {
                            yield Ok::<_, anyhow::Error>(batch);
                        }
                        tokio::time::sleep(hold).await;
                    };
                    Ok(stream.boxed())
                }
                Some(Script::Refuse) | None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn config() -> DashboardConfig {
        let mut config = DashboardConfig::default();
        config.synthetic.interval_ms = 100;
        config.live.connect_delay_ms = 50;
        config.live.base_delay_ms = 100;
        config.live.max_attempts = 2;
        config.startup.ready_timeout_ms = 500;
        config
    }

    fn orchestrator(
        config: DashboardConfig,
        hub: Arc<TestHub>,
        feed: Option<Arc<dyn LiveFeed>>,
    ) -> DashboardOrchestrator {
        let board = Arc::new(ChartBoard::new());
        let controllers = [SensorType::Bh1750, SensorType::Sps30]
            .into_iter()
            .map(|t| ChartController::new(t, config.charts.clone(), board.clone()))
            .collect();
        let registry = ControllerRegistry::new(controllers, config.charts.recreate_delay());
        DashboardOrchestrator::new(config, registry, hub, feed)
    }

    fn offline() -> Arc<TestHub> {
        Arc::new(TestHub::new(None))
    }

    async fn light_appended(registry: &ControllerRegistry, index: usize) -> u64 {
        let controller = registry.get(SensorType::Bh1750).unwrap();
        let guard = controller.read().await;
        guard.charts()[0]
            .series(index)
            .map(|s| s.appended())
            .unwrap_or(0)
    }

    fn light(bus: u16, channel: u16, value: f64) -> SensorReading {
        SensorReading::new(SensorId::new(SensorType::Bh1750, bus, channel), BTreeMap::new(), 0)
            .with_metric("light", value)
    }

    #[tokio::test]
    async fn test_one_manager_per_registered_type() {
        let orchestrator = orchestrator(config(), offline(), None);
        let types: Vec<SensorType> = orchestrator.managers().into_keys().collect();
        assert_eq!(types, vec![SensorType::Bh1750, SensorType::Sps30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_falls_back_to_synthetic_data() {
        let orchestrator = orchestrator(config(), offline(), None);
        let registry = orchestrator.registry().clone();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(2)).await;

        let controller = registry.get(SensorType::Bh1750).unwrap();
        {
            let guard = controller.read().await;
            assert!(guard.is_ready());
            assert_eq!(guard.sensors(), &[SensorId::new(SensorType::Bh1750, 0, 0)]);
        }
        assert!(light_appended(&registry, 0).await >= 10);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_fetches_groups_once() {
        let hub = Arc::new(TestHub::new(Some(
            r#"{"bus_1": {"sensors": [
                {"bus": 1, "mux_channel": 0, "sensor_type": "BH1750"},
                {"bus": 1, "mux_channel": 1, "sensor_type": "SPS30"}
            ], "count": 2}}"#,
        )));
        let mut orchestrator = orchestrator(config(), Arc::clone(&hub), None);

        assert_eq!(orchestrator.discover_all().await, 2);
        assert_eq!(hub.listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_real_sensors_stops_synthetic() {
        let hub = Arc::new(TestHub::new(Some(
            r#"{"bus_1": {"sensors": [{"bus": 1, "mux_channel": 0, "sensor_type": "BH1750"}], "count": 1}}"#,
        )));
        let mut orchestrator = orchestrator(config(), hub, None);
        let shutdown = CancellationToken::new();

        orchestrator.start_synthetic(&shutdown);
        assert!(orchestrator.is_synthetic_running());

        assert_eq!(orchestrator.discover_all().await, 1);
        assert_eq!(orchestrator.begin_polling().await, 1);
        assert!(!orchestrator.is_synthetic_running());

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let controller = orchestrator.registry().get(SensorType::Bh1750).unwrap();
        assert!(controller.read().await.charts()[0]
            .series(0)
            .unwrap()
            .ys()
            .iter()
            .all(|v| *v == 300.0));

        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_sensors_without_live_data_keep_polling_off() {
        let mut orchestrator = orchestrator(config(), offline(), None);
        assert_eq!(orchestrator.discover_all().await, 0);
        assert_eq!(orchestrator.begin_polling().await, 0);
        for manager in orchestrator.managers().values() {
            assert!(manager.lock().await.is_mock());
            assert!(!manager.lock().await.is_polling());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_channel_routes_batches_and_gives_up() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            Script::Open {
                batches: vec![vec![light(0, 0, 1.0), light(0, 1, 2.0)], vec![light(0, 0, 3.0)]],
                hold: Duration::ZERO,
            },
            Script::Refuse,
        ]));
        let mut orchestrator = orchestrator(config(), offline(), None);
        orchestrator
            .registry()
            .get(SensorType::Bh1750)
            .unwrap()
            .write()
            .await
            .assign_sensors(vec![
                SensorId::new(SensorType::Bh1750, 0, 0),
                SensorId::new(SensorType::Bh1750, 0, 1),
            ])
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let exit = orchestrator.run_live_channel(feed.clone(), &shutdown).await;

        assert_eq!(exit, LiveExit::Exhausted);
        assert_eq!(feed.connects.load(Ordering::SeqCst), 3);
        let registry = orchestrator.registry();
        assert_eq!(light_appended(registry, 0).await, 2);
        assert_eq!(light_appended(registry, 1).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_data_stops_synthetic_and_exhaustion_restarts_it() {
        // Connects at ~50ms, holds for 2s, then both retries are refused
        let feed: Arc<dyn LiveFeed> = Arc::new(ScriptedFeed::new(vec![Script::Open {
            batches: vec![vec![light(0, 0, 5.0)]],
            hold: Duration::from_secs(2),
        }]));
        let orchestrator = orchestrator(config(), offline(), Some(feed));
        let registry = orchestrator.registry().clone();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let connected = light_appended(&registry, 0).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(light_appended(&registry, 0).await, connected);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let resumed = light_appended(&registry, 0).await;
        assert!(resumed > connected, "synthetic data should resume: {connected} -> {resumed}");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_live_sensors_keep_synthetic_running() {
        let feed: Arc<dyn LiveFeed> = Arc::new(ScriptedFeed::new(vec![Script::Open {
            batches: vec![vec![light(1, 2, 410.0)]],
            hold: Duration::from_secs(10),
        }]));
        let orchestrator = orchestrator(config(), offline(), Some(feed));
        let registry = orchestrator.registry().clone();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = light_appended(&registry, 0).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after = light_appended(&registry, 0).await;
        assert!(after > before, "charts froze: {before} -> {after}");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let feed = Arc::new(ScriptedFeed::default());
        let mut config = config();
        config.live.max_attempts = 100;
        let mut orchestrator = orchestrator(config, offline(), None);
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let exit = orchestrator.run_live_channel(feed, &shutdown).await;
        assert_eq!(exit, LiveExit::Cancelled);
    }
}
