// Multi-series chart domain model
use super::series::{ChartPoint, SlidingWindowSeries, XAxisMode};
use chrono::DateTime;
use serde::Serialize;
use std::collections::VecDeque;

/// Series index whose points advance the shared x-axis labels
const CANONICAL_INDEX: usize = 0;

/// N index-addressed series sharing one label axis
#[derive(Debug, Clone)]
pub struct MultiSeriesChart {
    metric: String,
    capacity: usize,
    mode: XAxisMode,
    series: Vec<SlidingWindowSeries>,
    labels: VecDeque<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub label: String,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    pub id: String,
    pub metric: String,
    pub title: String,
    pub unit: String,
    pub labels: Vec<String>,
    pub series: Vec<SeriesSnapshot>,
}

impl MultiSeriesChart {
    pub fn new(metric: impl Into<String>, capacity: usize, mode: XAxisMode) -> Self {
        Self {
            metric: metric.into(),
            capacity: capacity.max(1),
            mode,
            series: Vec::new(),
            labels: VecDeque::new(),
        }
    }

    /// Allocate one series per label; positions are fixed for the chart's life
    pub fn create_series(&mut self, labels: &[String]) {
        self.series = labels
            .iter()
            .map(|label| SlidingWindowSeries::new(label.clone(), self.capacity, self.mode))
            .collect();
        self.labels.clear();
    }

    /// Returns false when the point was not stored
    pub fn append_to_index(&mut self, index: usize, value: f64, timestamp_ms: i64) -> bool {
        let Some(series) = self.series.get_mut(index) else {
            tracing::warn!(
                "Chart {} has {} series, ignoring point for index {}",
                self.metric,
                self.series.len(),
                index
            );
            return false;
        };

        if let Err(e) = series.append(value, timestamp_ms) {
            tracing::debug!("Skipping point: {}", e);
            return false;
        }

        if index == CANONICAL_INDEX {
            self.append_shared_label(timestamp_ms);
        }
        true
    }

    pub fn append_shared_label(&mut self, timestamp_ms: i64) {
        if self.labels.len() >= self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(format_label(timestamp_ms));
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, index: usize) -> Option<&SlidingWindowSeries> {
        self.series.get(index)
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn snapshot(&self, id: &str, title: &str, unit: &str) -> ChartSnapshot {
        ChartSnapshot {
            id: id.to_string(),
            metric: self.metric.clone(),
            title: title.to_string(),
            unit: unit.to_string(),
            labels: self.labels.iter().cloned().collect(),
            series: self
                .series
                .iter()
                .map(|s| SeriesSnapshot {
                    label: s.label().to_string(),
                    points: s.points().copied().collect(),
                })
                .collect(),
        }
    }
}

fn format_label(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
