//! Bin telemetry intake: reading validation, threshold bands, and the
//! deduplicating task-creation decision.

mod bands;
mod monitor;
mod reading;
mod registry;

pub use bands::{NORMAL_LABEL, ThresholdBand, ThresholdBands};
pub use monitor::{ReadingOutcome, TelemetryMonitor};
pub use reading::BinReading;
pub use registry::{BinInfo, BinRegistry, UNKNOWN_LOCATION};
