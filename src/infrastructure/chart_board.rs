// In-memory render target shared by all chart controllers
use crate::application::chart_renderer::{ChartRenderer, RenderError};
use crate::domain::chart::ChartSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChartEvent {
    Created { chart: ChartSnapshot },
    Updated { chart: ChartSnapshot },
    Destroyed { id: String },
}

/// Latest snapshot per chart id plus a fan-out of every change
#[derive(Clone)]
pub struct ChartBoard {
    charts: Arc<RwLock<BTreeMap<String, ChartSnapshot>>>,
    events: broadcast::Sender<ChartEvent>,
}

impl Default for ChartBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            charts: Arc::new(RwLock::new(BTreeMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.events.subscribe()
    }

    pub async fn snapshots(&self) -> Vec<ChartSnapshot> {
        self.charts.read().await.values().cloned().collect()
    }

    pub async fn snapshot(&self, id: &str) -> Option<ChartSnapshot> {
        self.charts.read().await.get(id).cloned()
    }

    fn publish(&self, event: ChartEvent) {
        // No subscribers is fine; the snapshot map is the source of truth
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ChartRenderer for ChartBoard {
    async fn create_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError> {
        self.charts
            .write()
            .await
            .insert(chart.id.clone(), chart.clone());
        self.publish(ChartEvent::Created { chart });
        Ok(())
    }

    async fn update_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError> {
        {
            let mut charts = self.charts.write().await;
            let Some(slot) = charts.get_mut(&chart.id) else {
                return Err(RenderError::Detached(chart.id));
            };
            *slot = chart.clone();
        }
        self.publish(ChartEvent::Updated { chart });
        Ok(())
    }

    async fn destroy_chart(&self, chart_id: &str) {
        if self.charts.write().await.remove(chart_id).is_some() {
            self.publish(ChartEvent::Destroyed {
                id: chart_id.to_string(),
            });
        }
    }
}
