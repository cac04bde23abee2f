// Live feed trait - push channel delivering batches of readings
use crate::domain::sensor::SensorReading;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Batches until the connection closes; an `Err` item ends the connection
pub type ReadingStream = BoxStream<'static, anyhow::Result<Vec<SensorReading>>>;

#[async_trait]
pub trait LiveFeed: Send + Sync {
    async fn connect(&self) -> anyhow::Result<ReadingStream>;
}

/// Linear reconnect backoff: `attempt * base`
pub fn backoff_delay(attempt: u32, base: std::time::Duration) -> std::time::Duration {
    base.saturating_mul(attempt)
}
