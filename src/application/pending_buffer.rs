// Pending data buffer - readings held until a chart is ready
use crate::domain::sensor::SensorReading;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct PendingDataBuffer {
    queue: VecDeque<SensorReading>,
}

impl PendingDataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reading: SensorReading) {
        self.queue.push_back(reading);
    }

    /// Take everything queued so far in arrival order, leaving the buffer empty.
    /// Readings pushed after this call land in the fresh queue.
    pub fn drain(&mut self) -> Vec<SensorReading> {
        Vec::from(std::mem::take(&mut self.queue))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
