//! Infrastructure adapters and runtime bootstrap.

pub mod audio;
pub mod clock;
pub mod error;
pub mod notify;
pub mod storage;
pub mod telemetry;
pub mod transport;
