pub mod event;
pub mod geo;
pub mod telemetry;
