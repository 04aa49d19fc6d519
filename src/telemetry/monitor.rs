use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use super::bands::ThresholdBands;
use super::reading::BinReading;
use super::registry::BinRegistry;
use crate::error::{Result, TaskError};
use crate::tasks::{NewTask, Task, TaskLifecycleManager, TaskSource};

/// What a reading led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingOutcome {
    /// Below the lowest band; nothing to do.
    BelowThreshold,
    /// A new automatic task was opened.
    Created(Task),
    /// An unresolved automatic task already covers this bin.
    Deduplicated { existing: String, escalated: bool },
}

impl ReadingOutcome {
    pub fn created_task_id(&self) -> Option<&str> {
        match self {
            ReadingOutcome::Created(task) => Some(&task.id),
            _ => None,
        }
    }
}

/// Turns bin readings into automatic tasks, at most one unresolved per bin.
pub struct TelemetryMonitor {
    lifecycle: Arc<TaskLifecycleManager>,
    bands: ThresholdBands,
    registry: BinRegistry,
    // One async lock per bin. Readings for the same bin serialize their
    // check-then-create; other bins proceed in parallel.
    bin_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TelemetryMonitor {
    pub fn new(lifecycle: Arc<TaskLifecycleManager>, bands: ThresholdBands, registry: BinRegistry) -> Self {
        Self {
            lifecycle,
            bands,
            registry,
            bin_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn bands(&self) -> &ThresholdBands {
        &self.bands
    }

    fn lock_for(&self, bin_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.bin_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(bin_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Classify a reading and open an automatic task if the bin has none.
    ///
    /// A reading that lands in a higher band than an open task's priority
    /// escalates that task instead of creating another one.
    pub async fn on_reading(&self, reading: &BinReading) -> Result<ReadingOutcome> {
        reading.validate()?;

        let Some(band) = self.bands.classify(reading.level_percent) else {
            tracing::debug!(
                "Bin {} at {:.0}% is below every threshold",
                reading.bin_id,
                reading.level_percent
            );
            return Ok(ReadingOutcome::BelowThreshold);
        };

        let lock = self.lock_for(&reading.bin_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.lifecycle.open_automatic_for(&reading.bin_id).await? {
            let escalated = if band.priority > existing.priority {
                let note = format!("Escalated to {} at {:.0}%", band.label, reading.level_percent);
                self.lifecycle
                    .escalate(&existing.id, band.priority, &note, Some(reading.clone()))
                    .await?;
                true
            } else {
                false
            };
            tracing::debug!(
                "Bin {} already has open task {} (escalated: {escalated})",
                reading.bin_id,
                existing.id
            );
            return Ok(ReadingOutcome::Deduplicated {
                existing: existing.id,
                escalated,
            });
        }

        let (bin_name, bin_location) = self.registry.describe(&reading.bin_id);
        let created = self
            .lifecycle
            .create(NewTask {
                bin_id: reading.bin_id.clone(),
                bin_name: Some(bin_name),
                bin_location,
                priority: band.priority,
                source: TaskSource::Automatic,
                notes: None,
                reading: Some(reading.clone()),
            })
            .await;
        let task = match created {
            Ok(task) => task,
            // Another process sharing the store opened one first.
            Err(TaskError::OpenAutomaticExists { existing, .. }) => {
                return Ok(ReadingOutcome::Deduplicated {
                    existing,
                    escalated: false,
                });
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "Bin {} reached {:.0}% ({}), opened task {}",
            reading.bin_id,
            reading.level_percent,
            band.label,
            task.id
        );
        Ok(ReadingOutcome::Created(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BinwatchError;
    use crate::tasks::{
        InMemoryStaffDirectory, InMemoryTaskRepository, Priority, StaffMember, TaskFilter,
    };
    use crate::telemetry::BinInfo;
    use chrono::Utc;

    fn lifecycle() -> Arc<TaskLifecycleManager> {
        let staff = InMemoryStaffDirectory::new([StaffMember {
            id: "s-1".into(),
            name: "Josh Canillas".into(),
            phone: None,
            push_token: None,
            available: true,
        }]);
        Arc::new(TaskLifecycleManager::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(staff),
        ))
    }

    fn monitor(lifecycle: Arc<TaskLifecycleManager>) -> TelemetryMonitor {
        let registry = BinRegistry::new([BinInfo {
            id: "bin1".into(),
            name: None,
            location: Some("Central Plaza".into()),
        }]);
        TelemetryMonitor::new(lifecycle, ThresholdBands::default(), registry)
    }

    fn reading(bin: &str, level: f64) -> BinReading {
        BinReading {
            bin_id: bin.into(),
            level_percent: level,
            weight_kg: 0.041,
            height_percent: 0.0,
            gps_valid: true,
            satellite_count: 6,
            timestamp: Utc::now(),
        }
    }

    async fn automatic_tasks(lifecycle: &TaskLifecycleManager, bin: &str) -> Vec<Task> {
        lifecycle
            .list(&TaskFilter {
                bin_id: Some(bin.into()),
                source: Some(TaskSource::Automatic),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_readings_create_exactly_one_task() {
        let lc = lifecycle();
        let m = monitor(lc.clone());

        let first = m.on_reading(&reading("bin1", 86.0)).await.unwrap();
        let id = first.created_task_id().unwrap().to_string();
        let second = m.on_reading(&reading("bin1", 88.0)).await.unwrap();
        let third = m.on_reading(&reading("bin1", 92.0)).await.unwrap();

        assert_eq!(
            second,
            ReadingOutcome::Deduplicated {
                existing: id.clone(),
                escalated: false
            }
        );
        assert_eq!(
            third,
            ReadingOutcome::Deduplicated {
                existing: id.clone(),
                escalated: true
            }
        );

        let tasks = automatic_tasks(&lc, "bin1").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, Priority::High);
        assert_eq!(tasks[0].notes.as_deref(), Some("Escalated to high at 92%"));
        assert_eq!(tasks[0].bin_location, "Central Plaza");
    }

    #[tokio::test]
    async fn band_boundaries_set_priority() {
        let lc = lifecycle();
        let m = monitor(lc.clone());

        for (bin, level, expected) in [
            ("a", 85.0, Priority::Medium),
            ("b", 90.0, Priority::High),
            ("c", 95.0, Priority::Critical),
        ] {
            let outcome = m.on_reading(&reading(bin, level)).await.unwrap();
            match outcome {
                ReadingOutcome::Created(task) => assert_eq!(task.priority, expected),
                other => panic!("expected a new task, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let lc = lifecycle();
        let m = monitor(lc.clone());
        let outcome = m.on_reading(&reading("bin1", 60.0)).await.unwrap();
        assert_eq!(outcome, ReadingOutcome::BelowThreshold);
        assert!(automatic_tasks(&lc, "bin1").await.is_empty());
    }

    #[tokio::test]
    async fn resolved_task_allows_a_new_one() {
        let lc = lifecycle();
        let m = monitor(lc.clone());

        let first = m.on_reading(&reading("bin1", 90.0)).await.unwrap();
        let id = first.created_task_id().unwrap().to_string();
        lc.assign(&id, "s-1", None).await.unwrap();
        lc.complete(&id, None).await.unwrap();

        let again = m.on_reading(&reading("bin1", 91.0)).await.unwrap();
        assert!(again.created_task_id().is_some());
        assert_ne!(again.created_task_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn invalid_reading_is_rejected() {
        let m = monitor(lifecycle());
        let err = m.on_reading(&reading("bin1", 140.0)).await.unwrap_err();
        assert!(matches!(err, BinwatchError::Telemetry(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readings_for_one_bin_do_not_duplicate() {
        let lc = lifecycle();
        let m = Arc::new(monitor(lc.clone()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let m = m.clone();
            let bin = if i % 2 == 0 { "bin1" } else { "bin2" };
            handles.push(tokio::spawn(async move {
                m.on_reading(&reading(bin, 86.0 + (i % 10) as f64)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(automatic_tasks(&lc, "bin1").await.len(), 1);
        assert_eq!(automatic_tasks(&lc, "bin2").await.len(), 1);
    }
}
