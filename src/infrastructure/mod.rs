// Infrastructure layer - External dependencies and adapters
pub mod chart_board;
pub mod config;
pub mod hub_client;
pub mod live_channel;
pub mod synthetic;
