//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod retrieval;
pub mod telemetry;
