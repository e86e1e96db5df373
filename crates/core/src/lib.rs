pub mod copy;
pub mod drain;
pub mod signal;
pub mod telemetry;
pub mod version;
