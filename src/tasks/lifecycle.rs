use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use super::repository::TaskRepository;
use super::staff::{StaffDirectory, StaffMember};
use super::state::{TaskAction, TaskStateMachine, TaskStatus, Transition};
use super::task::{NewTask, Priority, Task, TaskFilter, TaskSource};
use crate::error::{TaskError, TransitionError};
use crate::telemetry::BinReading;

/// Attribution recorded for assignments made without a human dispatcher.
pub const SYSTEM_ASSIGNER: &str = "system";

/// Emitted after a successful `assign`; consumed by the notifier.
#[derive(Debug, Clone)]
pub struct AssignmentEvent {
    pub task: Task,
    pub staff: StaffMember,
}

/// Sole authority over task state. Every write to the task store goes
/// through here and is validated against [`TaskStateMachine`].
pub struct TaskLifecycleManager {
    repo: Arc<dyn TaskRepository>,
    staff: Arc<dyn StaffDirectory>,
    events: Option<mpsc::UnboundedSender<AssignmentEvent>>,
    // Serializes read-validate-write cycles against the store.
    write_lock: Mutex<()>,
}

impl TaskLifecycleManager {
    pub fn new(repo: Arc<dyn TaskRepository>, staff: Arc<dyn StaffDirectory>) -> Self {
        Self {
            repo,
            staff,
            events: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Publish assignment events on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AssignmentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn staff(&self) -> &Arc<dyn StaffDirectory> {
        &self.staff
    }

    /// Create a task in `pending`. An automatic task is refused while the bin
    /// still has an unresolved automatic one.
    pub async fn create(&self, input: NewTask) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        if input.source == TaskSource::Automatic
            && let Some(existing) = self.repo.find_open_automatic(&input.bin_id).await?
        {
            return Err(TaskError::OpenAutomaticExists {
                bin_id: input.bin_id,
                existing: existing.id,
            });
        }
        let task = Task::new(input);
        self.repo.save(&task).await?;
        tracing::info!(
            "Task created: {} for {} ({}, {})",
            task.id,
            task.bin_id,
            task.source,
            task.priority
        );
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Result<Task, TaskError> {
        self.repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        self.repo.list(filter).await
    }

    pub async fn open_automatic_for(&self, bin_id: &str) -> Result<Option<Task>, TaskError> {
        self.repo.find_open_automatic(bin_id).await
    }

    /// `pending → in_progress`, recording the assignee. The staff member must
    /// exist and be available.
    pub async fn assign(
        &self,
        task_id: &str,
        staff_id: &str,
        assigned_by: Option<&str>,
    ) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        let (mut task, transition) = self.load_for(task_id, TaskAction::Assign).await?;

        let staff = match self.staff.find(staff_id).await {
            Some(member) if member.available => member,
            _ => {
                return Err(TransitionError::StaffUnavailable {
                    task_id: task_id.to_string(),
                    staff_id: staff_id.to_string(),
                }
                .into());
            }
        };

        if let Transition::Next(status) = transition {
            task.status = status;
        }
        task.assigned_staff_id = Some(staff.id.clone());
        task.assigned_staff_name = Some(staff.name.clone());
        task.assigned_by = Some(assigned_by.unwrap_or(SYSTEM_ASSIGNER).to_string());
        task.updated_at = Utc::now();
        self.repo.save(&task).await?;

        tracing::info!("Task {} assigned to {} ({})", task.id, staff.name, staff.id);
        if let Some(tx) = &self.events
            && tx
                .send(AssignmentEvent {
                    task: task.clone(),
                    staff,
                })
                .is_err()
        {
            tracing::debug!("No assignment listener for task {}", task.id);
        }
        Ok(task)
    }

    /// Assign to the available staff member with the fewest tasks in progress.
    /// Returns `Ok(None)` when nobody is available; the task stays pending.
    pub async fn auto_assign(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        let candidates = self.staff.available().await;
        if candidates.is_empty() {
            tracing::warn!("No staff available to auto-assign task {task_id}");
            return Ok(None);
        }

        let in_progress = self
            .repo
            .list(&TaskFilter {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            })
            .await?;
        let mut load: HashMap<&str, usize> = HashMap::new();
        for task in &in_progress {
            if let Some(id) = task.assigned_staff_id.as_deref() {
                *load.entry(id).or_insert(0) += 1;
            }
        }

        let Some(chosen) = candidates
            .iter()
            .min_by_key(|m| (load.get(m.id.as_str()).copied().unwrap_or(0), m.id.clone()))
        else {
            return Ok(None);
        };
        self.assign(task_id, &chosen.id, Some(SYSTEM_ASSIGNER))
            .await
            .map(Some)
    }

    /// `in_progress → done`.
    pub async fn complete(&self, task_id: &str, notes: Option<&str>) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        let (mut task, transition) = self.load_for(task_id, TaskAction::Complete).await?;

        let now = Utc::now();
        if let Transition::Next(status) = transition {
            task.status = status;
        }
        if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            task.append_note(&format!("Completed: {notes}"));
        }
        task.completed_at = Some(now);
        task.updated_at = now;
        self.repo.save(&task).await?;
        tracing::info!("Task {} completed", task.id);
        Ok(task)
    }

    /// `pending | in_progress → cancelled`. Cancelling a cancelled task is a no-op.
    pub async fn cancel(&self, task_id: &str) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        let (mut task, transition) = self.load_for(task_id, TaskAction::Cancel).await?;

        if let Transition::Next(status) = transition {
            task.status = status;
            task.updated_at = Utc::now();
            self.repo.save(&task).await?;
            tracing::info!("Task {} cancelled", task.id);
        }
        Ok(task)
    }

    /// `done | cancelled → archived`. Unresolved tasks are rejected; an archived
    /// task only has its archival timestamp refreshed.
    pub async fn archive(&self, task_id: &str) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        let (mut task, transition) = self.load_for(task_id, TaskAction::Archive).await?;

        let now = Utc::now();
        if let Transition::Next(status) = transition {
            task.status = status;
            task.updated_at = now;
        }
        task.archived_at = Some(now);
        self.repo.save(&task).await?;
        tracing::info!("Task {} archived", task.id);
        Ok(task)
    }

    /// Raise an unresolved task's priority and record why. Never lowers it:
    /// a `priority` at or below the current one leaves the task untouched.
    pub async fn escalate(
        &self,
        task_id: &str,
        priority: Priority,
        note: &str,
        reading: Option<BinReading>,
    ) -> Result<Task, TaskError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.get(task_id).await?;

        if !task.status.is_unresolved() || priority <= task.priority {
            return Ok(task);
        }
        tracing::warn!(
            "Task {} escalated {} -> {}: {note}",
            task.id,
            task.priority,
            priority
        );
        task.priority = priority;
        task.append_note(note);
        if reading.is_some() {
            task.reading = reading;
        }
        task.updated_at = Utc::now();
        self.repo.save(&task).await?;
        Ok(task)
    }

    async fn load_for(&self, task_id: &str, action: TaskAction) -> Result<(Task, Transition), TaskError> {
        let task = self.get(task_id).await?;
        match TaskStateMachine::next(task.status, action) {
            Some(transition) => Ok((task, transition)),
            None => Err(TransitionError::InvalidState {
                task_id: task.id,
                from: task.status,
                action,
            }
            .into()),
        }
    }
}
