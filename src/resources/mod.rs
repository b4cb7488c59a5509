//! Resource telemetry and the adaptive policies driven by it.

pub mod model_pool;
pub mod monitor;
pub mod policy;
