pub mod health;
pub mod model;
pub mod telemetry;
