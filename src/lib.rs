//! `switchbot-mhz19-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, the metrics
//! endpoint and process exit codes. The core "business logic" lives in
//! [`crate::app`] where it can be tested deterministically with an injected
//! radio and metrics sink.

pub mod advertisement;
pub mod app;
pub mod duration;
pub mod mac_address;
pub mod poller;
pub mod roster;
pub mod router;
pub mod scanner;
pub mod serial;
pub mod sink;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{Advertisement, NotApplicable, ThermometerReading, decode};
pub use mac_address::MacAddress;
pub use roster::{DeviceEntry, Roster, RosterError};
pub use router::TelemetryRouter;
pub use scanner::{Backend, ScanError};
pub use serial::{SerialError, SerialFrameClient};
pub use sink::{DeviceGauge, MetricsSink, PrometheusSink};
