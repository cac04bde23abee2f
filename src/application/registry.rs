// Controller registry - routes readings to the chart controller of their sensor type
use crate::application::chart_controller::{
    forward_reading, ChartController, ReadinessState, SharedController, UpdateOutcome,
};
use crate::domain::sensor::{SensorId, SensorReading, SensorType};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no chart controller registered for {0}")]
    Unregistered(SensorType),
}

/// Per-batch routing counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub routed: usize,
    pub applied: usize,
}

#[derive(Clone)]
pub struct ControllerRegistry {
    controllers: Arc<BTreeMap<SensorType, SharedController>>,
    recreate_delay: Duration,
}

impl ControllerRegistry {
    pub fn new(controllers: Vec<ChartController>, recreate_delay: Duration) -> Self {
        let controllers = controllers
            .into_iter()
            .map(|c| (c.sensor_type(), c.into_shared()))
            .collect();
        Self {
            controllers: Arc::new(controllers),
            recreate_delay,
        }
    }

    pub fn get(&self, sensor_type: SensorType) -> Option<SharedController> {
        self.controllers.get(&sensor_type).cloned()
    }

    pub fn sensor_types(&self) -> impl Iterator<Item = SensorType> + '_ {
        self.controllers.keys().copied()
    }

    pub async fn route(&self, reading: SensorReading) -> Result<UpdateOutcome, RoutingError> {
        let sensor_type = reading.sensor_type();
        let controller = self
            .controllers
            .get(&sensor_type)
            .ok_or(RoutingError::Unregistered(sensor_type))?;
        Ok(forward_reading(controller, reading, self.recreate_delay).await)
    }

    /// Route a batch; a failure for one reading never affects the rest
    pub async fn route_all(&self, readings: Vec<SensorReading>) -> RouteSummary {
        let mut summary = RouteSummary::default();
        for reading in readings {
            let sensor_id = reading.sensor_id;
            match self.route(reading).await {
                Ok(outcome) => {
                    summary.routed += 1;
                    if outcome == UpdateOutcome::Applied {
                        summary.applied += 1;
                    }
                }
                Err(e) => tracing::warn!("Dropping reading from {}: {}", sensor_id, e),
            }
        }
        summary
    }

    /// Sensors to synthesize data for: assigned sensors, or `mock_count` placeholders
    /// for controllers that have none yet
    pub async fn synthetic_targets(&self, mock_count: u16) -> Vec<SensorId> {
        let mut targets = Vec::new();
        for (sensor_type, controller) in self.controllers.iter() {
            let guard = controller.read().await;
            if guard.sensors().is_empty() && guard.state() == ReadinessState::NotReady {
                targets.extend((0..mock_count).map(|ch| SensorId::new(*sensor_type, 0, ch)));
            } else {
                targets.extend_from_slice(guard.sensors());
            }
        }
        targets
    }

    /// Wait for every controller's ready signal, bounded by `timeout`
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut signals = Vec::new();
        for controller in self.controllers.values() {
            signals.push(controller.read().await.subscribe_ready());
        }

        let all_ready = async move {
            for mut signal in signals {
                if signal.wait_for(|ready| *ready).await.is_err() {
                    return false;
                }
            }
            true
        };

        tokio::time::timeout(timeout, all_ready)
            .await
            .unwrap_or(false)
    }
}
