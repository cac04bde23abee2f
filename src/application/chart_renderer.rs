// Render target trait - where chart state is published
use crate::domain::chart::ChartSnapshot;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("chart '{0}' is not attached to the render target")]
    Detached(String),
    #[error("render target unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Attach a new chart, replacing any chart with the same id
    async fn create_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError>;

    /// Publish new state for an attached chart
    async fn update_chart(&self, chart: ChartSnapshot) -> Result<(), RenderError>;

    async fn destroy_chart(&self, chart_id: &str);
}
