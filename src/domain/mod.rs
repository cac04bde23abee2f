// Domain layer - Sensors, readings and chart series
pub mod chart;
pub mod sensor;
pub mod series;
