//! Composer → tracker → channel. One assignment event fans out to SMS and
//! push side by side; each key goes through the tracker before any I/O happens.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::composer::NotificationComposer;
use super::delivery::{DeliveryTracker, JobStatus, NotificationJob};
use super::push::PushSender;
use super::Channel;
use crate::error::{DeliveryError, ModemError};
use crate::modem::SmsReceipt;
use crate::tasks::{AssignmentEvent, StaffMember, Task};

/// Outbound SMS seam, implemented by the modem dispatcher handle.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, number: &str, message: &str) -> Result<SmsReceipt, ModemError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// The key already has a sent or in-flight job; nothing was transmitted.
    Duplicate,
    Failed(String),
    Skipped(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub task_id: String,
    pub channel: Channel,
    pub outcome: DeliveryOutcome,
}

pub struct Notifier {
    composer: NotificationComposer,
    tracker: Mutex<DeliveryTracker>,
    sms: Option<Arc<dyn SmsSender>>,
    push: Arc<dyn PushSender>,
}

impl Notifier {
    pub fn new(
        composer: NotificationComposer,
        sms: Option<Arc<dyn SmsSender>>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        Self {
            composer,
            tracker: Mutex::new(DeliveryTracker::new()),
            sms,
            push,
        }
    }

    /// Notify the assignee on every channel they can be reached on.
    /// Failures are recorded on the job and never roll back the assignment.
    pub async fn notify_assigned(&self, task: &Task, staff: &StaffMember) -> Vec<DeliveryReport> {
        let sms = async {
            match (&self.sms, staff.phone.as_deref()) {
                (None, _) => self.skipped(task, Channel::Sms, "sms disabled"),
                (Some(_), None) => self.skipped(task, Channel::Sms, "no phone number"),
                (Some(_), Some(phone)) => self.deliver(task, Channel::Sms, phone).await,
            }
        };
        let push = async {
            match staff.push_token.as_deref() {
                None => self.skipped(task, Channel::Push, "no push token"),
                Some(token) => self.deliver(task, Channel::Push, token).await,
            }
        };
        let (sms, push) = tokio::join!(sms, push);
        vec![sms, push]
    }

    /// Explicitly re-send a failed notification to its original recipient.
    pub async fn retry(&self, task: &Task, channel: Channel) -> Result<DeliveryReport, DeliveryError> {
        let recipient = {
            let tracker = self.tracker.lock().await;
            let job = tracker
                .get(&task.id, channel)
                .ok_or_else(|| DeliveryError::UnknownJob {
                    task_id: task.id.clone(),
                    channel,
                })?;
            if job.status != JobStatus::Failed {
                return Err(DeliveryError::Duplicate {
                    task_id: task.id.clone(),
                    channel,
                    state: job.status.as_str(),
                });
            }
            job.recipient.clone()
        };
        tracing::info!("Retrying {channel} notification for task {}", task.id);
        Ok(self.deliver(task, channel, &recipient).await)
    }

    pub async fn job(&self, task_id: &str, channel: Channel) -> Option<NotificationJob> {
        self.tracker.lock().await.get(task_id, channel).cloned()
    }

    pub async fn jobs_for(&self, task_id: &str) -> Vec<NotificationJob> {
        self.tracker
            .lock()
            .await
            .jobs_for(task_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Consume assignment events until every sender is dropped, then wait for
    /// the deliveries still running. Each event gets its own task, so a slow
    /// modem never holds back push for later assignments. SMS still leave in
    /// order through the modem queue.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<AssignmentEvent>) {
        let mut deliveries = JoinSet::new();
        while let Some(event) = events.recv().await {
            let notifier = Arc::clone(&self);
            deliveries.spawn(async move {
                notifier.notify_assigned(&event.task, &event.staff).await;
            });
            while deliveries.try_join_next().is_some() {}
        }
        tracing::debug!("Assignment event stream closed");
        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Notification task failed: {e}");
            }
        }
    }

    fn skipped(&self, task: &Task, channel: Channel, reason: &'static str) -> DeliveryReport {
        tracing::debug!("Skipping {channel} for task {}: {reason}", task.id);
        report(task, channel, DeliveryOutcome::Skipped(reason))
    }

    async fn deliver(&self, task: &Task, channel: Channel, recipient: &str) -> DeliveryReport {
        let rendered = match self.composer.render(task, channel) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("Cannot render {channel} for task {}: {e}", task.id);
                return report(task, channel, DeliveryOutcome::Failed(e.to_string()));
            }
        };
        let body = rendered.body.clone();

        if let Err(e) = self
            .tracker
            .lock()
            .await
            .enqueue(&task.id, channel, recipient, rendered)
        {
            tracing::info!("Not re-sending: {e}");
            return report(task, channel, DeliveryOutcome::Duplicate);
        }

        let result = match channel {
            Channel::Sms => match &self.sms {
                Some(sms) => sms
                    .send_sms(recipient, &body)
                    .await
                    .map(|receipt| {
                        tracing::debug!(
                            "SMS accepted in {} mode, refs {:?}",
                            receipt.mode,
                            receipt.references
                        );
                    })
                    .map_err(|e| (e.to_string(), e.carrier_code())),
                None => Err(("sms disabled".to_string(), None)),
            },
            Channel::Push => self.push.push(recipient, &body).await.map_err(|e| (e, None)),
        };

        let mut tracker = self.tracker.lock().await;
        let outcome = match result {
            Ok(()) => {
                tracing::info!("Notified {recipient} via {channel} for task {}", task.id);
                tracker.mark_sent(&task.id, channel).map(|_| DeliveryOutcome::Sent)
            }
            Err((reason, carrier_code)) => {
                match carrier_code {
                    Some(code) => tracing::warn!(
                        "{channel} to {recipient} failed for task {}: {reason} [{}]",
                        task.id,
                        code.description()
                    ),
                    None => tracing::warn!(
                        "{channel} to {recipient} failed for task {}: {reason}",
                        task.id
                    ),
                }
                tracker
                    .mark_failed(&task.id, channel, reason.clone(), carrier_code)
                    .map(|_| DeliveryOutcome::Failed(reason))
            }
        };
        let outcome = outcome.unwrap_or_else(|e| DeliveryOutcome::Failed(e.to_string()));
        report(task, channel, outcome)
    }
}

fn report(task: &Task, channel: Channel, outcome: DeliveryOutcome) -> DeliveryReport {
    DeliveryReport {
        task_id: task.id.clone(),
        channel,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::modem::{CarrierCode, SendMode};
    use crate::tasks::{NewTask, Priority};
    use crate::telemetry::ThresholdBands;

    /// Fails the first `failures` sends, then accepts.
    struct CountingSms {
        calls: AtomicUsize,
        failures: usize,
    }

    impl CountingSms {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SmsSender for CountingSms {
        async fn send_sms(&self, _number: &str, message: &str) -> Result<SmsReceipt, ModemError> {
            assert!(crate::notify::gsm::septet_len(message) <= 160);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ModemError::Send {
                    carrier_code: Some(CarrierCode::NoNetworkService),
                    message: "+CMS ERROR: 331".into(),
                });
            }
            Ok(SmsReceipt {
                mode: SendMode::Text,
                references: vec![n as u8],
                fell_back: false,
            })
        }
    }

    #[derive(Default)]
    struct RecordingPush {
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PushSender for RecordingPush {
        async fn push(&self, recipient: &str, payload: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn staff() -> StaffMember {
        StaffMember {
            id: "s-1".into(),
            name: "Ana Reyes".into(),
            phone: Some("+15550100".into()),
            push_token: Some("device-1".into()),
            available: true,
        }
    }

    fn task() -> Task {
        let mut task = Task::new(NewTask::manual("bin1", "Central Plaza", Priority::High).with_notes("Clean bin"));
        task.assigned_by = Some("Josh Canillas".into());
        task
    }

    fn notifier(sms: Arc<CountingSms>, push: Arc<RecordingPush>) -> Notifier {
        let composer = NotificationComposer::new(ThresholdBands::default(), 1).unwrap();
        Notifier::new(composer, Some(sms), push)
    }

    #[tokio::test]
    async fn duplicate_assignment_does_not_resend() {
        let sms = CountingSms::new(0);
        let push = Arc::new(RecordingPush::default());
        let n = notifier(sms.clone(), push.clone());
        let task = task();

        let first = n.notify_assigned(&task, &staff()).await;
        assert!(first.iter().all(|r| r.outcome == DeliveryOutcome::Sent));

        let second = n.notify_assigned(&task, &staff()).await;
        assert!(second.iter().all(|r| r.outcome == DeliveryOutcome::Duplicate));
        assert_eq!(sms.calls(), 1);
        assert_eq!(push.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_sms_is_recorded_and_retry_is_explicit() {
        let sms = CountingSms::new(1);
        let n = notifier(sms.clone(), Arc::new(RecordingPush::default()));
        let task = task();

        let reports = n.notify_assigned(&task, &staff()).await;
        assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed(_)));
        assert_eq!(reports[1].outcome, DeliveryOutcome::Sent);

        let job = n.job(&task.id, Channel::Sms).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.carrier_code, Some(CarrierCode::NoNetworkService));
        assert_eq!(sms.calls(), 1);

        let retried = n.retry(&task, Channel::Sms).await.unwrap();
        assert_eq!(retried.outcome, DeliveryOutcome::Sent);
        let job = n.job(&task.id, Channel::Sms).await.unwrap();
        assert_eq!((job.status, job.attempt), (JobStatus::Sent, 2));

        let err = n.retry(&task, Channel::Sms).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Duplicate { state: "sent", .. }));
        assert_eq!(sms.calls(), 2);
    }

    #[tokio::test]
    async fn retry_without_prior_job_is_rejected() {
        let n = notifier(CountingSms::new(0), Arc::new(RecordingPush::default()));
        let err = n.retry(&task(), Channel::Push).await.unwrap_err();
        assert!(matches!(err, DeliveryError::UnknownJob { .. }));
    }

    #[tokio::test]
    async fn unreachable_channels_are_skipped() {
        let sms = CountingSms::new(0);
        let n = notifier(sms.clone(), Arc::new(RecordingPush::default()));
        let mut member = staff();
        member.phone = None;
        member.push_token = None;

        let reports = n.notify_assigned(&task(), &member).await;
        assert_eq!(reports[0].outcome, DeliveryOutcome::Skipped("no phone number"));
        assert_eq!(reports[1].outcome, DeliveryOutcome::Skipped("no push token"));
        assert_eq!(sms.calls(), 0);
    }

    #[tokio::test]
    async fn run_drains_events_until_closed() {
        let sms = CountingSms::new(0);
        let push = Arc::new(RecordingPush::default());
        let n = Arc::new(notifier(sms.clone(), push.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        let a = task();
        let b = task();
        tx.send(AssignmentEvent { task: a.clone(), staff: staff() }).unwrap();
        tx.send(AssignmentEvent { task: b.clone(), staff: staff() }).unwrap();
        drop(tx);
        Arc::clone(&n).run(rx).await;

        assert_eq!(sms.calls(), 2);
        let pushed: Vec<_> = push.sent.lock().unwrap().iter().map(|(r, _)| r.clone()).collect();
        assert_eq!(pushed, vec!["device-1", "device-1"]);
        assert!(n.job(&a.id, Channel::Sms).await.is_some());
        assert!(n.job(&b.id, Channel::Push).await.is_some());
    }

    /// Holds every SMS for `delay` before accepting it.
    struct SlowSms {
        delay: std::time::Duration,
        done: AtomicUsize,
    }

    #[async_trait]
    impl SmsSender for SlowSms {
        async fn send_sms(&self, _number: &str, _message: &str) -> Result<SmsReceipt, ModemError> {
            tokio::time::sleep(self.delay).await;
            let n = self.done.fetch_add(1, Ordering::SeqCst);
            Ok(SmsReceipt {
                mode: SendMode::Text,
                references: vec![n as u8],
                fell_back: false,
            })
        }
    }

    #[tokio::test]
    async fn push_is_not_held_back_by_a_slow_modem() {
        let sms = Arc::new(SlowSms {
            delay: std::time::Duration::from_millis(400),
            done: AtomicUsize::new(0),
        });
        let push = Arc::new(RecordingPush::default());
        let composer = NotificationComposer::new(ThresholdBands::default(), 1).unwrap();
        let n = Arc::new(Notifier::new(composer, Some(sms.clone()), push.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        let a = task();
        let b = task();
        tx.send(AssignmentEvent { task: a.clone(), staff: staff() }).unwrap();
        tx.send(AssignmentEvent { task: b.clone(), staff: staff() }).unwrap();
        drop(tx);
        let running = tokio::spawn(Arc::clone(&n).run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(push.sent.lock().unwrap().len(), 2);
        assert_eq!(sms.done.load(Ordering::SeqCst), 0);
        assert_eq!(n.job(&a.id, Channel::Push).await.unwrap().status, JobStatus::Sent);
        assert_eq!(n.job(&b.id, Channel::Sms).await.unwrap().status, JobStatus::Queued);

        running.await.unwrap();
        assert_eq!(sms.done.load(Ordering::SeqCst), 2);
        assert_eq!(n.job(&b.id, Channel::Sms).await.unwrap().status, JobStatus::Sent);
    }
}
