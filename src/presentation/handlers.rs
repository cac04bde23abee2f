// HTTP request handlers
use crate::application::sensor_manager::SensorStatus;
use crate::domain::chart::ChartSnapshot;
use crate::domain::sensor::SensorType;
use crate::infrastructure::chart_board::ChartEvent;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Latest snapshot of every attached chart
pub async fn list_charts(State(state): State<Arc<AppState>>) -> Json<Vec<ChartSnapshot>> {
    Json(state.board.snapshots().await)
}

pub async fn get_chart(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.board.snapshot(&id).await {
        Some(chart) => Json(chart).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no chart {}", id)).into_response(),
    }
}

/// Server-sent chart events, starting with a `created` event per current chart
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // Subscribe before snapshotting so no change falls in between
    let mut events = BroadcastStream::new(state.board.subscribe());
    let current = state.board.snapshots().await;

    let stream = async_stream::stream! {
        for chart in current {
            yield Event::default().json_data(ChartEvent::Created { chart });
        }

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => yield Event::default().json_data(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} chart events", skipped);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Manager state, readiness and error budget per sensor type
pub async fn list_sensors(State(state): State<Arc<AppState>>) -> Json<Vec<SensorStatus>> {
    let mut statuses = Vec::with_capacity(state.managers.len());
    for manager in state.managers.values() {
        statuses.push(manager.lock().await.status().await);
    }
    Json(statuses)
}

/// Manual chart rebuild for one sensor type; clears a degraded controller
pub async fn recreate_sensor_charts(
    Path(sensor_type): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(manager) = SensorType::from_prefix(&sensor_type)
        .and_then(|t| state.managers.get(&t))
    else {
        return (
            StatusCode::NOT_FOUND,
            format!("unknown sensor type {}", sensor_type),
        )
            .into_response();
    };

    let mut manager = manager.lock().await;
    match manager.recreate().await {
        Ok(()) => Json(manager.status().await).into_response(),
        Err(e) => {
            tracing::warn!("Manual recreate of {} failed: {}", manager.sensor_type(), e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_controller::ChartController;
    use crate::application::sensor_hub::{SensorGroup, SensorHubApi, SensorValueResponse};
    use crate::application::sensor_manager::{ManagerState, SensorManager};
    use crate::infrastructure::chart_board::ChartBoard;
    use crate::infrastructure::config::ChartSettings;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct NoHub;

    #[async_trait]
    impl SensorHubApi for NoHub {
        async fn list_sensor_groups(&self) -> anyhow::Result<BTreeMap<String, SensorGroup>> {
            anyhow::bail!("offline")
        }

        async fn read_sensor(
            &self,
            _sensor_type: SensorType,
            _bus: u16,
            _channel: u16,
        ) -> anyhow::Result<SensorValueResponse> {
            anyhow::bail!("offline")
        }
    }

    fn state() -> Arc<AppState> {
        let board = ChartBoard::new();
        let controller = ChartController::new(
            SensorType::Bh1750,
            ChartSettings::default(),
            Arc::new(board.clone()),
        )
        .into_shared();
        let manager = SensorManager::new(
            SensorType::Bh1750,
            Arc::new(NoHub),
            controller,
            Duration::from_secs(1),
            Duration::from_millis(10),
        );

        let mut managers = BTreeMap::new();
        managers.insert(SensorType::Bh1750, manager.into_shared());
        Arc::new(AppState { board, managers })
    }

    #[tokio::test]
    async fn test_recreate_then_fetch_chart() {
        let state = state();

        let response = get_chart(Path("bh1750-light".to_string()), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            recreate_sensor_charts(Path("BH1750".to_string()), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_chart(Path("bh1750-light".to_string()), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(list_charts(State(state)).await.0.len(), 1);
    }

    #[tokio::test]
    async fn test_recreate_unknown_or_unregistered_type() {
        let state = state();

        let response = recreate_sensor_charts(Path("xyz".to_string()), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = recreate_sensor_charts(Path("sps30".to_string()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_sensors_reports_manager_state() {
        let state = state();
        let statuses = list_sensors(State(state.clone())).await.0;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].controller.sensor_type, SensorType::Bh1750);
        assert_eq!(statuses[0].manager, ManagerState::Idle);

        recreate_sensor_charts(Path("bh1750".to_string()), State(state.clone())).await;
        let statuses = list_sensors(State(state)).await.0;
        assert_eq!(statuses[0].manager, ManagerState::Recreated);
        assert!(!statuses[0].controller.degraded);

        let json = serde_json::to_value(&statuses[0]).unwrap();
        assert_eq!(json["manager"]["state"], "recreated");
        assert_eq!(json["sensor_type"], "bh1750");
    }
}
