// Synthetic reading generator - keeps charts alive when no hub data is available
use crate::domain::sensor::{SensorId, SensorReading};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Baseline, sine swing and noise amplitude for a metric
fn profile(metric: &str) -> (f64, f64, f64) {
    match metric {
        "light" => (350.0, 120.0, 10.0),
        "temperature" => (22.0, 1.5, 0.1),
        "humidity" => (45.0, 5.0, 0.5),
        "pressure" => (1013.0, 2.0, 0.2),
        "gas_resistance" => (120.0, 25.0, 2.0),
        "differential_pressure" => (0.0, 8.0, 0.5),
        "pm1_0" => (6.0, 2.0, 0.3),
        "pm2_5" => (9.0, 3.0, 0.5),
        "pm4_0" => (11.0, 3.0, 0.5),
        "pm10" => (12.0, 4.0, 0.6),
        _ => (0.0, 1.0, 0.1),
    }
}

pub struct SyntheticGenerator {
    rng: StdRng,
    step: u64,
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            step: 0,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            step: 0,
        }
    }

    /// One reading per sensor carrying every metric of its type
    pub fn batch(&mut self, sensors: &[SensorId], timestamp_ms: i64) -> Vec<SensorReading> {
        let t = self.step as f64;
        self.step += 1;

        let mut readings = Vec::with_capacity(sensors.len());
        for sensor_id in sensors {
            // Offset each sensor so lines on the same chart don't overlap
            let phase = sensor_id.bus as f64 * 0.7 + sensor_id.channel as f64 * 1.3;

            let mut metrics = BTreeMap::new();
            for spec in sensor_id.sensor_type.metrics() {
                let (base, swing, noise) = profile(spec.key);
                let mut value =
                    base + swing * (t * 0.15 + phase).sin() + self.rng.random_range(-noise..=noise);
                if spec.key != "differential_pressure" {
                    value = value.max(0.0);
                }
                metrics.insert(spec.key.to_string(), value);
            }

            readings.push(SensorReading::new(*sensor_id, metrics, timestamp_ms));
        }
        readings
    }

    pub fn step(&self) -> u64 {
        self.step
    }
}
