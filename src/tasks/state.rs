use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a maintenance task.
///
/// Tasks flow: PENDING → IN_PROGRESS → DONE → ARCHIVED, with CANCELLED reachable
/// from any unresolved state and ARCHIVED as the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
    Archived,
}

impl TaskStatus {
    /// Pending or in progress: the bin condition has not been dealt with yet.
    pub fn is_unresolved(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Archived
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A requested lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Assign,
    Complete,
    Cancel,
    Archive,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Assign => write!(f, "assign"),
            TaskAction::Complete => write!(f, "complete"),
            TaskAction::Cancel => write!(f, "cancel"),
            TaskAction::Archive => write!(f, "archive"),
        }
    }
}

/// The result of evaluating an action against a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move the task to a new status.
    Next(TaskStatus),
    /// Already in the requested status; the action is a no-op.
    Unchanged,
    /// Archived tasks only get their archival timestamp refreshed.
    Rearchive,
}

/// Transition table for the task lifecycle.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Compute the transition for `action` from `status`, or `None` when the
    /// action is not allowed from that status.
    ///
    /// - `assign`: pending → in_progress
    /// - `complete`: in_progress → done
    /// - `cancel`: pending | in_progress → cancelled; cancelled is idempotent
    /// - `archive`: done | cancelled → archived; unresolved tasks must be resolved first
    pub fn next(status: TaskStatus, action: TaskAction) -> Option<Transition> {
        use TaskStatus::*;

        match (status, action) {
            (Pending, TaskAction::Assign) => Some(Transition::Next(InProgress)),
            (InProgress, TaskAction::Complete) => Some(Transition::Next(Done)),
            (Pending | InProgress, TaskAction::Cancel) => Some(Transition::Next(Cancelled)),
            (Cancelled, TaskAction::Cancel) => Some(Transition::Unchanged),
            (Done | Cancelled, TaskAction::Archive) => Some(Transition::Next(Archived)),
            (Archived, TaskAction::Archive) => Some(Transition::Rearchive),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_states() {
        let t = TaskStateMachine::next(TaskStatus::Pending, TaskAction::Assign);
        assert_eq!(t, Some(Transition::Next(TaskStatus::InProgress)));

        let t = TaskStateMachine::next(TaskStatus::InProgress, TaskAction::Complete);
        assert_eq!(t, Some(Transition::Next(TaskStatus::Done)));

        let t = TaskStateMachine::next(TaskStatus::Done, TaskAction::Archive);
        assert_eq!(t, Some(Transition::Next(TaskStatus::Archived)));
    }

    #[test]
    fn cancel_is_reachable_from_every_unresolved_state() {
        for status in [TaskStatus::Pending, TaskStatus::InProgress] {
            assert_eq!(
                TaskStateMachine::next(status, TaskAction::Cancel),
                Some(Transition::Next(TaskStatus::Cancelled))
            );
        }
        assert_eq!(
            TaskStateMachine::next(TaskStatus::Cancelled, TaskAction::Cancel),
            Some(Transition::Unchanged)
        );
        assert_eq!(TaskStateMachine::next(TaskStatus::Done, TaskAction::Cancel), None);
        assert_eq!(TaskStateMachine::next(TaskStatus::Archived, TaskAction::Cancel), None);
    }

    #[test]
    fn unresolved_tasks_cannot_be_archived() {
        assert_eq!(TaskStateMachine::next(TaskStatus::Pending, TaskAction::Archive), None);
        assert_eq!(TaskStateMachine::next(TaskStatus::InProgress, TaskAction::Archive), None);
    }

    #[test]
    fn no_backward_moves() {
        assert_eq!(TaskStateMachine::next(TaskStatus::Done, TaskAction::Assign), None);
        assert_eq!(TaskStateMachine::next(TaskStatus::InProgress, TaskAction::Assign), None);
        assert_eq!(TaskStateMachine::next(TaskStatus::Pending, TaskAction::Complete), None);
        assert_eq!(TaskStateMachine::next(TaskStatus::Archived, TaskAction::Complete), None);
    }

    #[test]
    fn archived_only_rearchives() {
        assert_eq!(
            TaskStateMachine::next(TaskStatus::Archived, TaskAction::Archive),
            Some(Transition::Rearchive)
        );
        assert!(TaskStatus::Archived.is_terminal());
    }

    #[test]
    fn status_display_and_parse() {
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!("in_progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("Canceled".parse::<TaskStatus>(), Ok(TaskStatus::Cancelled));
        assert!("open".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
    }
}
