// Sliding window series - bounded FIFO of chart points for one sensor
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
}

/// How the x value of a point is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XAxisMode {
    /// Free-running append counter
    #[default]
    Counter,
    /// Dense 0..len-1 positions, renumbered after every append
    Resequence,
    /// Reading timestamp in milliseconds
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series '{label}' rejected non-finite value {value}")]
    NonFinite { label: String, value: f64 },
}

#[derive(Debug, Clone)]
pub struct SlidingWindowSeries {
    label: String,
    capacity: usize,
    mode: XAxisMode,
    points: VecDeque<ChartPoint>,
    appended: u64,
}

impl SlidingWindowSeries {
    pub fn new(label: impl Into<String>, capacity: usize, mode: XAxisMode) -> Self {
        let capacity = capacity.max(1);
        Self {
            label: label.into(),
            capacity,
            mode,
            points: VecDeque::with_capacity(capacity),
            appended: 0,
        }
    }

    /// Push at the tail, evicting the head first when full
    pub fn append(&mut self, y: f64, timestamp_ms: i64) -> Result<(), SeriesError> {
        if !y.is_finite() {
            return Err(SeriesError::NonFinite {
                label: self.label.clone(),
                value: y,
            });
        }

        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }

        let x = match self.mode {
            XAxisMode::Counter => self.appended as f64,
            XAxisMode::Resequence => self.points.len() as f64,
            XAxisMode::Timestamp => timestamp_ms as f64,
        };
        self.points.push_back(ChartPoint { x, y });
        self.appended += 1;

        if self.mode == XAxisMode::Resequence {
            self.resequence_x();
        }

        Ok(())
    }

    /// Renumber x to the point's current position
    pub fn resequence_x(&mut self) {
        for (position, point) in self.points.iter_mut().enumerate() {
            point.x = position as f64;
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total number of accepted appends, including evicted points
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn points(&self) -> impl Iterator<Item = &ChartPoint> {
        self.points.iter()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }
}
