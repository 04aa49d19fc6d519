//! Drives readings through the whole pipeline:
//! monitor → lifecycle (create, optional auto-assign) → assignment event →
//! notifier (compose, track, send).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BinwatchConfig;
use crate::error::Result;
use crate::notify::{LogPushSender, NotificationComposer, Notifier, PushSender, SmsSender, WebhookPushSender};
use crate::tasks::{
    InMemoryStaffDirectory, InMemoryTaskRepository, JsonFileTaskRepository, StaffDirectory, Task,
    TaskLifecycleManager, TaskRepository,
};
use crate::telemetry::{BinReading, BinRegistry, ReadingOutcome, TelemetryMonitor, ThresholdBands};

/// What one reading led to.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub outcome: ReadingOutcome,
    /// Set when a new task was auto-assigned.
    pub assigned: Option<Task>,
}

pub struct Coordinator {
    monitor: TelemetryMonitor,
    lifecycle: Arc<TaskLifecycleManager>,
    notifier: Arc<Notifier>,
    auto_assign: bool,
    notifications: JoinHandle<()>,
}

impl Coordinator {
    /// Must be called inside a tokio runtime; the notifier loop is spawned here.
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        staff: Arc<dyn StaffDirectory>,
        bands: ThresholdBands,
        registry: BinRegistry,
        notifier: Arc<Notifier>,
        auto_assign: bool,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(TaskLifecycleManager::new(repo, staff).with_events(tx));
        let monitor = TelemetryMonitor::new(lifecycle.clone(), bands, registry);

        let listener = notifier.clone();
        let notifications = tokio::spawn(async move { listener.run(rx).await });

        Self {
            monitor,
            lifecycle,
            notifier,
            auto_assign,
            notifications,
        }
    }

    /// Build the store, staff directory and channels described by `config`.
    /// `sms` is the modem transport, or `None` to run without SMS.
    pub async fn from_config(config: &BinwatchConfig, sms: Option<Arc<dyn SmsSender>>) -> Result<Self> {
        let repo: Arc<dyn TaskRepository> = match &config.store.path {
            Some(path) => Arc::new(JsonFileTaskRepository::open(path).await?),
            None => Arc::new(InMemoryTaskRepository::new()),
        };
        let staff = Arc::new(InMemoryStaffDirectory::new(config.staff.clone()));

        let push: Arc<dyn PushSender> = match &config.push.webhook_url {
            Some(url) => {
                let timeout = Duration::from_secs(config.push.timeout_secs);
                let sender = WebhookPushSender::new(url.clone(), timeout).map_err(|e| {
                    crate::error::ConfigError::Invalid(format!("push webhook client: {e}"))
                })?;
                Arc::new(sender)
            }
            None => Arc::new(LogPushSender),
        };

        let composer = NotificationComposer::new(config.thresholds.clone(), config.sms.max_segments)?;
        let notifier = Arc::new(Notifier::new(composer, sms, push));

        Ok(Self::new(
            repo,
            staff,
            config.thresholds.clone(),
            BinRegistry::new(config.bins.clone()),
            notifier,
            config.assignment.auto_assign,
        ))
    }

    pub fn lifecycle(&self) -> &TaskLifecycleManager {
        &self.lifecycle
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Feed one reading. Telemetry and task errors are returned to the caller;
    /// notification failures never are.
    pub async fn ingest(&self, reading: &BinReading) -> Result<IngestReport> {
        let outcome = self.monitor.on_reading(reading).await?;
        let assigned = match &outcome {
            ReadingOutcome::Created(task) if self.auto_assign => {
                self.lifecycle.auto_assign(&task.id).await?
            }
            _ => None,
        };
        Ok(IngestReport { outcome, assigned })
    }

    /// Stop producing events and wait until every queued notification is
    /// handled.
    pub async fn finish(self) -> Arc<Notifier> {
        let Self {
            monitor,
            lifecycle,
            notifier,
            notifications,
            ..
        } = self;
        drop(monitor);
        drop(lifecycle);
        if let Err(e) = notifications.await {
            tracing::error!("Notification loop ended abnormally: {e}");
        }
        notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::ModemError;
    use crate::modem::{CarrierCode, SendMode, SmsReceipt};
    use crate::notify::{Channel, JobStatus};
    use crate::tasks::{StaffMember, TaskStatus};
    use crate::telemetry::BinInfo;

    #[derive(Default)]
    struct RecordingSms {
        sent: StdMutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        async fn send_sms(&self, number: &str, message: &str) -> std::result::Result<SmsReceipt, ModemError> {
            if self.fail {
                return Err(ModemError::Send {
                    carrier_code: Some(CarrierCode::SimRestriction),
                    message: "+CMS ERROR: 50".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((number.to_string(), message.to_string()));
            Ok(SmsReceipt {
                mode: SendMode::Text,
                references: vec![1],
                fell_back: false,
            })
        }
    }

    fn config() -> BinwatchConfig {
        let mut config = BinwatchConfig::default();
        config.assignment.auto_assign = true;
        config.bins = vec![BinInfo {
            id: "bin1".into(),
            name: None,
            location: Some("Central Plaza".into()),
        }];
        config.staff = vec![StaffMember {
            id: "s-1".into(),
            name: "Josh Canillas".into(),
            phone: Some("+639171234567".into()),
            push_token: None,
            available: true,
        }];
        config
    }

    fn reading(level: f64) -> BinReading {
        BinReading {
            bin_id: "bin1".into(),
            level_percent: level,
            weight_kg: 0.041,
            height_percent: 0.0,
            gps_valid: true,
            satellite_count: 5,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn threshold_reading_ends_in_one_sms() {
        let sms = Arc::new(RecordingSms::default());
        let c = Coordinator::from_config(&config(), Some(sms.clone())).await.unwrap();

        let first = c.ingest(&reading(88.0)).await.unwrap();
        let task = first.assigned.expect("auto-assigned");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_by.as_deref(), Some("system"));

        let again = c.ingest(&reading(89.0)).await.unwrap();
        assert!(matches!(again.outcome, ReadingOutcome::Deduplicated { .. }));
        assert!(again.assigned.is_none());

        let notifier = c.finish().await;
        let sent = sms.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+639171234567");
        assert!(sent[0].1.contains("Central Plaza"));
        assert!(sent[0].1.contains("88%"));
        let job = notifier.job(&task.id, Channel::Sms).await.unwrap();
        assert_eq!(job.status, JobStatus::Sent);
    }

    #[tokio::test]
    async fn failed_sms_leaves_assignment_in_place() {
        let sms = Arc::new(RecordingSms {
            fail: true,
            ..Default::default()
        });
        let c = Coordinator::from_config(&config(), Some(sms)).await.unwrap();
        let report = c.ingest(&reading(96.0)).await.unwrap();
        let task = report.assigned.unwrap();
        let stored = c.lifecycle().get(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);

        let notifier = c.finish().await;
        let job = notifier.job(&task.id, Channel::Sms).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.carrier_code, Some(CarrierCode::SimRestriction));
    }

    #[tokio::test]
    async fn without_auto_assign_tasks_stay_pending() {
        let mut cfg = config();
        cfg.assignment.auto_assign = false;
        let c = Coordinator::from_config(&cfg, None).await.unwrap();
        let report = c.ingest(&reading(91.0)).await.unwrap();
        let id = report.outcome.created_task_id().unwrap().to_string();
        assert!(report.assigned.is_none());
        assert_eq!(c.lifecycle().get(&id).await.unwrap().status, TaskStatus::Pending);

        // Manual assignment still notifies; SMS is skipped without a modem.
        c.lifecycle().assign(&id, "s-1", Some("Dispatcher")).await.unwrap();
        let notifier = c.finish().await;
        assert!(notifier.job(&id, Channel::Sms).await.is_none());
    }
}
