// Chart controller - readiness gate, error budget and chart updates for one sensor type
use crate::application::chart_renderer::{ChartRenderer, RenderError};
use crate::application::pending_buffer::PendingDataBuffer;
use crate::domain::chart::{ChartSnapshot, MultiSeriesChart};
use crate::domain::sensor::{SensorId, SensorReading, SensorType};
use crate::infrastructure::config::ChartSettings;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

pub type SharedController = Arc<RwLock<ChartController>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    NotReady,
    Ready,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Point stored and published
    Applied,
    /// Held until the chart is ready
    Buffered,
    /// Error budget exhausted, reading discarded
    Suppressed,
    /// No series for this sensor id
    Unindexed,
    /// Reading carried no value for any charted metric
    Skipped,
    /// Publishing failed; the caller should schedule a recreate
    RecreateScheduled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub sensor_type: SensorType,
    pub state: ReadinessState,
    pub sensors: Vec<SensorId>,
    pub consecutive_errors: u32,
    pub degraded: bool,
    pub pending: usize,
}

/// Owns one chart per metric of a sensor type; all charts share the
/// series index assigned to each sensor.
pub struct ChartController {
    sensor_type: SensorType,
    settings: ChartSettings,
    renderer: Arc<dyn ChartRenderer>,
    charts: Vec<MultiSeriesChart>,
    sensors: Vec<SensorId>,
    state: ReadinessState,
    pending: PendingDataBuffer,
    consecutive_errors: u32,
    ready_tx: watch::Sender<bool>,
}

impl ChartController {
    pub fn new(
        sensor_type: SensorType,
        settings: ChartSettings,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            sensor_type,
            settings,
            renderer,
            charts: Vec::new(),
            sensors: Vec::new(),
            state: ReadinessState::NotReady,
            pending: PendingDataBuffer::new(),
            consecutive_errors: 0,
            ready_tx,
        }
    }

    pub fn into_shared(self) -> SharedController {
        Arc::new(RwLock::new(self))
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_errors >= self.settings.max_errors
    }

    pub fn error_count(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn sensors(&self) -> &[SensorId] {
        &self.sensors
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn charts(&self) -> &[MultiSeriesChart] {
        &self.charts
    }

    /// Flips to true the first time the controller becomes ready
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn series_index(&self, sensor_id: &SensorId) -> Option<usize> {
        self.sensors.iter().position(|s| s == sensor_id)
    }

    pub fn chart_id(&self, metric: &str) -> String {
        format!("{}-{}", self.sensor_type.prefix(), metric)
    }

    pub fn buffer(&mut self, reading: SensorReading) {
        self.pending.push(reading);
    }

    /// First call initializes the charts; later calls rebuild them when the sensor set changed
    pub async fn assign_sensors(&mut self, sensors: Vec<SensorId>) -> Result<(), RenderError> {
        if self.state != ReadinessState::NotReady && sensors == self.sensors {
            return Ok(());
        }

        tracing::info!(
            "{} charts: {} -> {} sensors",
            self.sensor_type,
            self.sensors.len(),
            sensors.len()
        );
        self.sensors = sensors;
        self.recreate_chart().await
    }

    pub async fn update_with_reading(&mut self, reading: SensorReading) -> UpdateOutcome {
        match self.state {
            ReadinessState::NotReady => {
                self.buffer(reading);
                return UpdateOutcome::Buffered;
            }
            ReadinessState::Recovering => {
                if self.is_degraded() {
                    return UpdateOutcome::Suppressed;
                }
                self.buffer(reading);
                return UpdateOutcome::Buffered;
            }
            ReadinessState::Ready => {}
        }

        if self.is_degraded() {
            return UpdateOutcome::Suppressed;
        }

        let Some(index) = self.series_index(&reading.sensor_id) else {
            tracing::warn!(
                "No {} series for sensor {}, chart needs a rebuild",
                self.sensor_type,
                reading.sensor_id
            );
            return UpdateOutcome::Unindexed;
        };

        let mut touched = Vec::new();
        for (position, chart) in self.charts.iter_mut().enumerate() {
            if let Some(value) = reading.metric(chart.metric()) {
                if chart.append_to_index(index, value, reading.timestamp_ms) {
                    touched.push(position);
                }
            }
        }

        if touched.is_empty() {
            tracing::debug!("Reading from {} had no chartable metrics", reading.sensor_id);
            return UpdateOutcome::Skipped;
        }

        for position in touched {
            let snapshot = self.snapshot_at(position);
            if let Err(e) = self.renderer.update_chart(snapshot).await {
                return self.record_failure(e);
            }
        }

        self.consecutive_errors = 0;
        UpdateOutcome::Applied
    }

    /// Destroy and rebuild every chart from the current sensor list, then flush the buffer
    pub async fn recreate_chart(&mut self) -> Result<(), RenderError> {
        for spec in self.sensor_type.metrics() {
            let id = self.chart_id(spec.key);
            self.renderer.destroy_chart(&id).await;
        }

        self.build_charts();

        for snapshot in self.snapshots() {
            if let Err(e) = self.renderer.create_chart(snapshot).await {
                self.consecutive_errors += 1;
                self.state = ReadinessState::Recovering;
                tracing::warn!(
                    "Recreating {} charts failed ({}/{}): {}",
                    self.sensor_type,
                    self.consecutive_errors,
                    self.settings.max_errors,
                    e
                );
                return Err(e);
            }
        }

        // The budget only resets once the buffered readings are published too
        let prior_errors = self.consecutive_errors;
        self.consecutive_errors = 0;
        self.state = ReadinessState::Ready;
        self.ready_tx.send_replace(true);

        let flushed = self.flush_pending().await;
        if self.state != ReadinessState::Ready {
            self.consecutive_errors = prior_errors + 1;
            self.state = ReadinessState::Recovering;
            tracing::warn!(
                "Publishing buffered {} readings failed ({}/{})",
                self.sensor_type,
                self.consecutive_errors,
                self.settings.max_errors
            );
            return Err(RenderError::Unavailable(format!(
                "flushing buffered {} readings",
                self.sensor_type
            )));
        }

        if flushed > 0 {
            tracing::debug!("Flushed {} buffered {} readings", flushed, self.sensor_type);
        }
        Ok(())
    }

    /// Replay buffered readings through the live update path
    pub async fn flush_pending(&mut self) -> usize {
        let batch = self.pending.drain();
        let count = batch.len();
        for reading in batch {
            self.update_with_reading(reading).await;
        }
        count
    }

    pub fn snapshots(&self) -> Vec<ChartSnapshot> {
        (0..self.charts.len()).map(|p| self.snapshot_at(p)).collect()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            sensor_type: self.sensor_type,
            state: self.state,
            sensors: self.sensors.clone(),
            consecutive_errors: self.consecutive_errors,
            degraded: self.is_degraded(),
            pending: self.pending.len(),
        }
    }

    fn build_charts(&mut self) {
        let labels: Vec<String> = self.sensors.iter().map(|s| s.to_string()).collect();
        self.charts = self
            .sensor_type
            .metrics()
            .iter()
            .map(|spec| {
                let mut chart =
                    MultiSeriesChart::new(spec.key, self.settings.capacity, self.settings.x_axis);
                chart.create_series(&labels);
                chart
            })
            .collect();
    }

    // Charts are built in metric order, so positions line up with the metric specs
    fn snapshot_at(&self, position: usize) -> ChartSnapshot {
        let spec = &self.sensor_type.metrics()[position];
        self.charts[position].snapshot(&self.chart_id(spec.key), spec.title, spec.unit)
    }

    fn record_failure(&mut self, error: RenderError) -> UpdateOutcome {
        self.consecutive_errors += 1;
        self.state = ReadinessState::Recovering;

        if self.is_degraded() {
            tracing::warn!(
                "{} chart error budget exhausted, suppressing updates: {}",
                self.sensor_type,
                error
            );
            UpdateOutcome::Suppressed
        } else {
            tracing::warn!(
                "{} chart update failed ({}/{}): {}",
                self.sensor_type,
                self.consecutive_errors,
                self.settings.max_errors,
                error
            );
            UpdateOutcome::RecreateScheduled
        }
    }
}

/// Apply a reading through the shared handle, scheduling a recreate when publishing failed
pub async fn forward_reading(
    controller: &SharedController,
    reading: SensorReading,
    recreate_delay: Duration,
) -> UpdateOutcome {
    let outcome = controller.write().await.update_with_reading(reading).await;
    if outcome == UpdateOutcome::RecreateScheduled {
        schedule_recreate(Arc::clone(controller), recreate_delay);
    }
    outcome
}

/// Retry `recreate_chart` after `delay` until it succeeds or the budget runs out
pub fn schedule_recreate(controller: SharedController, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(delay).await;

            let mut guard = controller.write().await;
            if guard.is_ready() {
                break;
            }
            match guard.recreate_chart().await {
                Ok(()) => {
                    tracing::info!("{} charts recreated", guard.sensor_type());
                    break;
                }
                Err(_) if guard.is_degraded() => {
                    tracing::warn!(
                        "{} charts stay degraded until a manual recreate",
                        guard.sensor_type()
                    );
                    break;
                }
                Err(_) => {}
            }
        }
    })
}
