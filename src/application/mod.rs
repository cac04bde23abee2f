// Application layer - chart control, sensor management and orchestration
pub mod chart_controller;
pub mod chart_renderer;
pub mod live_feed;
pub mod orchestrator;
pub mod pending_buffer;
pub mod registry;
pub mod sensor_hub;
pub mod sensor_manager;
