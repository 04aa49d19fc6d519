//! Task store seam. The lifecycle manager is the only writer.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::RwLock;

use super::task::{Task, TaskFilter};
use crate::error::TaskError;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Finds a task by its ID.
    ///
    /// - `Ok(Some(Task))`: task found
    /// - `Ok(None)`: no such task
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, TaskError>;

    /// Inserts or replaces a task.
    async fn save(&self, task: &Task) -> Result<(), TaskError>;

    /// Tasks matching `filter`, oldest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// The unresolved automatic task for a bin, if one exists.
    async fn find_open_automatic(&self, bin_id: &str) -> Result<Option<Task>, TaskError> {
        let filter = TaskFilter {
            bin_id: Some(bin_id.to_string()),
            ..Default::default()
        };
        Ok(self
            .list(&filter)
            .await?
            .into_iter()
            .find(Task::is_open_automatic))
    }
}

fn sorted_matches<'a>(tasks: impl Iterator<Item = &'a Task>, filter: &TaskFilter) -> Vec<Task> {
    let mut matched: Vec<Task> = tasks.filter(|t| filter.matches(t)).cloned().collect();
    matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    matched
}

/// Process-local task store.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), TaskError> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        Ok(sorted_matches(self.tasks.read().await.values(), filter))
    }
}

/// Task store persisted as one pretty-printed JSON array.
///
/// Several processes may share the file (a long-running `ingest` next to
/// one-shot `task` commands). Reads load a fresh snapshot under a shared
/// lock; a save re-reads the file under an exclusive lock, replaces only the
/// saved task and writes the result back.
pub struct JsonFileTaskRepository {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileTaskRepository {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: &Path) -> Result<Self, TaskError> {
        let repo = Self {
            path: path.to_path_buf(),
            lock_path: path.with_extension("lock"),
        };
        let tasks = repo.snapshot().await?;
        tracing::debug!("Loaded {} tasks from {}", tasks.len(), path.display());
        Ok(repo)
    }

    async fn snapshot(&self) -> Result<HashMap<String, Task>, TaskError> {
        let (path, lock_path) = (self.path.clone(), self.lock_path.clone());
        blocking(move || {
            let _lock = StoreLock::acquire(&lock_path, false)?;
            read_store(&path)
        })
        .await
    }
}

/// Advisory lock on the `.lock` file next to the store, held until drop.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(lock_path: &Path, exclusive: bool) -> Result<Self, TaskError> {
        ensure_parent(lock_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| TaskError::Storage(format!("lock file error: {e}")))?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| TaskError::Storage(format!("failed to lock {}: {e}", lock_path.display())))?;
        Ok(Self { _file: file })
    }
}

fn ensure_parent(path: &Path) -> Result<(), TaskError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| TaskError::Storage(format!("create dir error: {e}")))?;
    }
    Ok(())
}

fn read_store(path: &Path) -> Result<HashMap<String, Task>, TaskError> {
    match std::fs::read_to_string(path) {
        Ok(json) => {
            let list: Vec<Task> = serde_json::from_str(&json)
                .map_err(|e| TaskError::Storage(format!("failed to parse {}: {e}", path.display())))?;
            Ok(list.into_iter().map(|t| (t.id.clone(), t)).collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(TaskError::Storage(format!("failed to read {}: {e}", path.display()))),
    }
}

fn write_store(path: &Path, tasks: &HashMap<String, Task>) -> Result<(), TaskError> {
    let ordered = sorted_matches(tasks.values(), &TaskFilter::default());
    let json = serde_json::to_string_pretty(&ordered)
        .map_err(|e| TaskError::Storage(format!("serialize error: {e}")))?;

    ensure_parent(path)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| TaskError::Storage(format!("write error: {e}")))?;
    std::fs::rename(&tmp, path).map_err(|e| TaskError::Storage(format!("rename error: {e}")))?;
    Ok(())
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, TaskError> + Send + 'static,
) -> Result<T, TaskError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskError::Storage(format!("store worker failed: {e}")))?
}

#[async_trait]
impl TaskRepository for JsonFileTaskRepository {
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.snapshot().await?.remove(task_id))
    }

    async fn save(&self, task: &Task) -> Result<(), TaskError> {
        let (path, lock_path, task) = (self.path.clone(), self.lock_path.clone(), task.clone());
        blocking(move || {
            let _lock = StoreLock::acquire(&lock_path, true)?;
            let mut tasks = read_store(&path)?;
            tasks.insert(task.id.clone(), task);
            write_store(&path, &tasks)
        })
        .await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        Ok(sorted_matches(self.snapshot().await?.values(), filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{NewTask, Priority, TaskSource, TaskStatus};

    fn automatic(bin: &str) -> Task {
        let mut input = NewTask::manual(bin, "Plaza", Priority::Medium);
        input.source = TaskSource::Automatic;
        Task::new(input)
    }

    #[tokio::test]
    async fn find_open_automatic_ignores_resolved_and_manual() {
        let repo = InMemoryTaskRepository::new();

        let mut done = automatic("bin1");
        done.status = TaskStatus::Done;
        repo.save(&done).await.unwrap();
        repo.save(&Task::new(NewTask::manual("bin1", "Plaza", Priority::Low)))
            .await
            .unwrap();
        assert!(repo.find_open_automatic("bin1").await.unwrap().is_none());

        let open = automatic("bin1");
        repo.save(&open).await.unwrap();
        let found = repo.find_open_automatic("bin1").await.unwrap().unwrap();
        assert_eq!(found.id, open.id);
        assert!(repo.find_open_automatic("bin2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let repo = InMemoryTaskRepository::new();
        let first = automatic("a");
        let mut second = automatic("b");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        repo.save(&second).await.unwrap();
        repo.save(&first).await.unwrap();

        let ids: Vec<_> = repo
            .list(&TaskFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.bin_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("tasks.json");

        let task = automatic("bin9");
        {
            let repo = JsonFileTaskRepository::open(&path).await.unwrap();
            repo.save(&task).await.unwrap();
        }

        let reopened = JsonFileTaskRepository::open(&path).await.unwrap();
        let loaded = reopened.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn json_stores_on_one_file_keep_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let ingest = JsonFileTaskRepository::open(&path).await.unwrap();
        let cli = JsonFileTaskRepository::open(&path).await.unwrap();

        let open = automatic("bin1");
        ingest.save(&open).await.unwrap();

        let manual = Task::new(NewTask::manual("bin2", "Depot", Priority::Low));
        cli.save(&manual).await.unwrap();
        let mut completed = cli.find_by_id(&open.id).await.unwrap().unwrap();
        completed.status = TaskStatus::Done;
        cli.save(&completed).await.unwrap();

        // The other handle sees the completion and does not erase it.
        assert!(ingest.find_open_automatic("bin1").await.unwrap().is_none());
        ingest.save(&automatic("bin3")).await.unwrap();

        let reopened = JsonFileTaskRepository::open(&path).await.unwrap();
        let all = reopened.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(reopened.find_by_id(&manual.id).await.unwrap().is_some());
        assert_eq!(
            reopened.find_by_id(&open.id).await.unwrap().unwrap().status,
            TaskStatus::Done
        );
    }

    #[tokio::test]
    async fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "not json").unwrap();

        let result = JsonFileTaskRepository::open(&path).await;
        assert!(matches!(result, Err(TaskError::Storage(_))));
    }
}
