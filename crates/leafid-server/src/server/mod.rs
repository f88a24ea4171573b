pub mod config;
pub mod handler;
pub mod state;
pub mod telemetry;
