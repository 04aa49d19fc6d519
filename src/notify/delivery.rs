//! Idempotency and outcome bookkeeping per `(task, channel)`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Channel, RenderedMessage};
use crate::error::DeliveryError;
use crate::modem::CarrierCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification attempt record. `attempt` counts accepted enqueues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub task_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub rendered_message: RenderedMessage,
    pub attempt: u32,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    pub carrier_code: Option<CarrierCode>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an accepted enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    First,
    Retry { attempt: u32 },
}

type JobKey = (String, Channel);

/// Tracks every `(task, channel)` job. A key with a `sent` job, or one still
/// `queued`, rejects further enqueues. A `failed` key accepts exactly one new
/// attempt per explicit enqueue.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    jobs: HashMap<JobKey, NotificationJob>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &mut self,
        task_id: &str,
        channel: Channel,
        recipient: &str,
        message: RenderedMessage,
    ) -> Result<Enqueued, DeliveryError> {
        let key = (task_id.to_string(), channel);
        let attempt = match self.jobs.get(&key) {
            Some(job) if job.status != JobStatus::Failed => {
                return Err(DeliveryError::Duplicate {
                    task_id: task_id.to_string(),
                    channel,
                    state: job.status.as_str(),
                });
            }
            Some(job) => job.attempt + 1,
            None => 1,
        };

        self.jobs.insert(
            key,
            NotificationJob {
                task_id: task_id.to_string(),
                channel,
                recipient: recipient.to_string(),
                rendered_message: message,
                attempt,
                status: JobStatus::Queued,
                failure_reason: None,
                carrier_code: None,
                updated_at: Utc::now(),
            },
        );
        Ok(if attempt == 1 {
            Enqueued::First
        } else {
            Enqueued::Retry { attempt }
        })
    }

    pub fn mark_sent(&mut self, task_id: &str, channel: Channel) -> Result<&NotificationJob, DeliveryError> {
        let job = self.job_mut(task_id, channel)?;
        job.status = JobStatus::Sent;
        job.failure_reason = None;
        job.carrier_code = None;
        job.updated_at = Utc::now();
        Ok(job)
    }

    pub fn mark_failed(
        &mut self,
        task_id: &str,
        channel: Channel,
        reason: impl Into<String>,
        carrier_code: Option<CarrierCode>,
    ) -> Result<&NotificationJob, DeliveryError> {
        let job = self.job_mut(task_id, channel)?;
        job.status = JobStatus::Failed;
        job.failure_reason = Some(reason.into());
        job.carrier_code = carrier_code;
        job.updated_at = Utc::now();
        Ok(job)
    }

    pub fn get(&self, task_id: &str, channel: Channel) -> Option<&NotificationJob> {
        self.jobs.get(&(task_id.to_string(), channel))
    }

    /// Jobs for one task, SMS before push.
    pub fn jobs_for(&self, task_id: &str) -> Vec<&NotificationJob> {
        let mut jobs: Vec<_> = self.jobs.values().filter(|j| j.task_id == task_id).collect();
        jobs.sort_by_key(|j| j.channel);
        jobs
    }

    fn job_mut(&mut self, task_id: &str, channel: Channel) -> Result<&mut NotificationJob, DeliveryError> {
        self.jobs
            .get_mut(&(task_id.to_string(), channel))
            .ok_or_else(|| DeliveryError::UnknownJob {
                task_id: task_id.to_string(),
                channel,
            })
    }
}
