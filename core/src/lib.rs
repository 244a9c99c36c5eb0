pub mod error;
pub mod features;
pub mod hashing;
pub mod metrics;
pub mod scoring;
pub mod synthetic;
pub mod telemetry;
