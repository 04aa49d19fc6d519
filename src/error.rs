use thiserror::Error;

use crate::modem::{CarrierCode, ModemState};
use crate::notify::Channel;
use crate::tasks::{TaskAction, TaskStatus};

#[derive(Debug, Error)]
pub enum BinwatchError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Composer(#[from] ComposerOverflowError),

    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// At most one unresolved automatic task may exist per bin.
    #[error("bin {bin_id} already has open automatic task {existing}")]
    OpenAutomaticExists { bin_id: String, existing: String },

    #[error("Task store error: {0}")]
    Storage(String),
}

/// A rejected lifecycle transition. Never corrected automatically; the caller
/// has to re-issue the request against the task's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} task {task_id} while it is {from}")]
    InvalidState {
        task_id: String,
        from: TaskStatus,
        action: TaskAction,
    },

    #[error("cannot assign task {task_id}: staff member {staff_id} is unavailable")]
    StaffUnavailable { task_id: String, staff_id: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("invalid reading for bin {bin_id}: {reason}")]
    InvalidReading { bin_id: String, reason: String },
}

/// Raised only when the SMS budget itself is too small to hold the truncation floor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message needs {required} septets but the SMS budget is {budget}")]
pub struct ComposerOverflowError {
    pub budget: usize,
    pub required: usize,
}

/// Why a serial port could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenCause {
    PortBusy,
    NotFound,
    PermissionDenied,
    Timeout,
    Other(String),
}

impl std::fmt::Display for OpenCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenCause::PortBusy => write!(f, "port_busy"),
            OpenCause::NotFound => write!(f, "not_found"),
            OpenCause::PermissionDenied => write!(f, "permission_denied"),
            OpenCause::Timeout => write!(f, "timeout"),
            OpenCause::Other(detail) => write!(f, "other: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModemError {
    #[error("cannot open {port}: {cause}")]
    Open { port: String, cause: OpenCause },

    #[error("modem initialization failed at `{command}`: {reason}")]
    Init { command: String, reason: String },

    #[error("SMSC mismatch: configured {expected}, modem reports {}", reported.as_deref().unwrap_or("none"))]
    SmscMismatch {
        expected: String,
        reported: Option<String>,
    },

    #[error("carrier rejected SMSC routing: {code}")]
    SmscRejected { code: CarrierCode },

    #[error("SMS send failed: {message}")]
    Send {
        carrier_code: Option<CarrierCode>,
        message: String,
    },

    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("modem not ready (state: {state})")]
    NotReady { state: ModemState },

    #[error("serial I/O error: {0}")]
    Io(String),

    #[error("modem dispatcher stopped")]
    DispatcherClosed,
}

impl ModemError {
    /// Carrier diagnostic attached to this failure, if the modem reported one.
    pub fn carrier_code(&self) -> Option<CarrierCode> {
        match self {
            ModemError::Send { carrier_code, .. } => *carrier_code,
            ModemError::SmscRejected { code } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("notification for task {task_id} via {channel} was already {state}")]
    Duplicate {
        task_id: String,
        channel: Channel,
        state: &'static str,
    },

    #[error("no notification job for task {task_id} via {channel}")]
    UnknownJob { task_id: String, channel: Channel },
}

pub type Result<T, E = BinwatchError> = std::result::Result<T, E>;
