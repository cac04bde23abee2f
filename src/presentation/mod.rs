// Presentation layer - HTTP API over the chart board
pub mod app_state;
pub mod handlers;
