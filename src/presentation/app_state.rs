// Application state for HTTP handlers
use crate::application::sensor_manager::SharedManager;
use crate::domain::sensor::SensorType;
use crate::infrastructure::chart_board::ChartBoard;
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct AppState {
    pub board: ChartBoard,
    pub managers: BTreeMap<SensorType, SharedManager>,
}
