use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::TaskStatus;
use crate::telemetry::BinReading;

/// Task urgency. Ordered so that a higher fill band never maps to a lower priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Who opened the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Automatic,
    Manual,
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSource::Automatic => write!(f, "automatic"),
            TaskSource::Manual => write!(f, "manual"),
        }
    }
}

/// A maintenance/collection task for one bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub bin_id: String,
    pub bin_name: String,
    pub bin_location: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub source: TaskSource,
    pub assigned_staff_id: Option<String>,
    pub assigned_staff_name: Option<String>,
    /// Who performed the assignment (a dispatcher's name, or `system`).
    pub assigned_by: Option<String>,
    pub notes: Option<String>,
    /// Latest telemetry snapshot for the bin, if any.
    pub reading: Option<BinReading>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub bin_id: String,
    pub bin_name: Option<String>,
    pub bin_location: String,
    pub priority: Priority,
    pub source: TaskSource,
    pub notes: Option<String>,
    pub reading: Option<BinReading>,
}

impl NewTask {
    pub fn manual(bin_id: impl Into<String>, bin_location: impl Into<String>, priority: Priority) -> Self {
        Self {
            bin_id: bin_id.into(),
            bin_name: None,
            bin_location: bin_location.into(),
            priority,
            source: TaskSource::Manual,
            notes: None,
            reading: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_reading(mut self, reading: BinReading) -> Self {
        self.reading = Some(reading);
        self
    }
}

impl Task {
    pub fn new(input: NewTask) -> Self {
        let now = Utc::now();
        let bin_name = input
            .bin_name
            .unwrap_or_else(|| format!("Bin {}", input.bin_id));
        Self {
            id: Uuid::new_v4().to_string(),
            bin_id: input.bin_id,
            bin_name,
            bin_location: input.bin_location,
            status: TaskStatus::Pending,
            priority: input.priority,
            source: input.source,
            assigned_staff_id: None,
            assigned_staff_name: None,
            assigned_by: None,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            reading: input.reading,
            created_at: now,
            updated_at: now,
            completed_at: None,
            archived_at: None,
        }
    }

    /// True for an automatic task that still suppresses new ones for its bin.
    pub fn is_open_automatic(&self) -> bool {
        self.source == TaskSource::Automatic && self.status.is_unresolved()
    }

    /// Append a line to the task notes.
    pub fn append_note(&mut self, line: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {line}"),
            _ => line.to_string(),
        });
    }
}

/// Criteria for listing tasks. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub bin_id: Option<String>,
    pub source: Option<TaskSource>,
    pub assigned_staff_id: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.bin_id.as_deref().is_none_or(|b| task.bin_id == b)
            && self.source.is_none_or(|s| task.source == s)
            && self
                .assigned_staff_id
                .as_deref()
                .is_none_or(|s| task.assigned_staff_id.as_deref() == Some(s))
    }
}
