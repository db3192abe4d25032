use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use wharf_utils::atomic_file::write_atomic;

use crate::error::StoreError;
use crate::models::event::{Event, EventKind};
use crate::models::task::{clamp_timeout, Task, TaskStatus, Usage};

struct Inner {
    tasks: HashMap<Uuid, Task>,
    events: HashMap<Uuid, Vec<Event>>,
    next_event_id: HashMap<Uuid, u64>,
}

/// Single-writer, multi-reader in-memory index backed by one JSON document
/// per task plus per-event trace files (spec §4.2).
pub struct Store {
    data_root: PathBuf,
    inner: Mutex<Inner>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    next_subscriber_id: AtomicU64,
}

impl Store {
    /// Scan `data_root`, loading every immediate child whose name parses as
    /// a UUID (spec §4.2 "Reload semantics"). Never fails on a single
    /// malformed task directory; that task is skipped with a logged warning.
    pub async fn load(data_root: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&data_root).await?;

        let mut tasks = HashMap::new();
        let mut events = HashMap::new();
        let mut next_event_id = HashMap::new();

        let mut entries = tokio::fs::read_dir(&data_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(task_id) = Uuid::parse_str(name) else {
                continue;
            };

            let task_json_path = path.join("task.json");
            let bytes = match tokio::fs::read(&task_json_path).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            let task: Task = match serde_json::from_slice(&bytes) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "skipping task with malformed task.json");
                    continue;
                }
            };

            let task_events = load_task_events(&path.join("traces")).await?;
            let next_id = task_events.len() as u64 + 1;
            tasks.insert(task_id, task);
            events.insert(task_id, task_events);
            next_event_id.insert(task_id, next_id);
        }

        Ok(Self {
            data_root,
            inner: Mutex::new(Inner {
                tasks,
                events,
                next_event_id,
            }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        })
    }

    pub fn task_dir(&self, id: Uuid) -> PathBuf {
        self.data_root.join(id.to_string())
    }

    fn outputs_dir(&self, id: Uuid) -> PathBuf {
        self.task_dir(id).join("outputs")
    }

    async fn persist_task(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.task_dir(task.id).join("task.json");
        let bytes = serde_json::to_vec_pretty(task)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    async fn broadcast(&self) {
        let subs = self.subscribers.lock().await;
        for sender in subs.values() {
            // Single-slot, non-blocking: a full channel means a signal is
            // already pending, so the drop is the correct coalescing behavior.
            let _ = sender.try_send(());
        }
    }

    pub async fn create_task(&self, prompt: String, timeout_minutes: u32) -> Result<Task, StoreError> {
        if prompt.trim().is_empty() {
            return Err(StoreError::InvalidInput("prompt must not be empty".into()));
        }

        let mut inner = self.inner.lock().await;
        let position = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Backlog)
            .map(|t| t.position)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);

        let task = Task::new(prompt, timeout_minutes, position);
        self.persist_task(&task).await?;
        inner.tasks.insert(task.id, task.clone());
        inner.events.insert(task.id, Vec::new());
        inner.next_event_id.insert(task.id, 1);
        drop(inner);
        self.broadcast().await;
        Ok(task)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        let inner = self.inner.lock().await;
        inner.tasks.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    pub async fn list_tasks(&self, include_archived: bool) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| include_archived || !t.archived)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.position.cmp(&b.position).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks)
    }

    async fn mutate<F>(&self, id: Uuid, f: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task) -> Result<(), StoreError>,
    {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound)?;
        f(task)?;
        task.updated_at = Utc::now();
        let snapshot = task.clone();
        self.persist_task(&snapshot).await?;
        drop(inner);
        self.broadcast().await;
        Ok(snapshot)
    }

    pub async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.status = status;
            Ok(())
        })
        .await
    }

    pub async fn update_task_position(&self, id: Uuid, position: i64) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.position = position;
            Ok(())
        })
        .await
    }

    pub async fn update_task_title(&self, id: Uuid, title: Option<String>) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.title = title;
            Ok(())
        })
        .await
    }

    pub async fn update_task_result(
        &self,
        id: Uuid,
        result: Option<String>,
        stop_reason: Option<String>,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.result = result;
            t.stop_reason = stop_reason;
            Ok(())
        })
        .await
    }

    pub async fn update_task_worktrees(
        &self,
        id: Uuid,
        worktree_paths: HashMap<String, String>,
        branch_name: String,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.worktree_paths = worktree_paths;
            t.branch_name = branch_name;
            Ok(())
        })
        .await
    }

    pub async fn update_task_commit_hashes(
        &self,
        id: Uuid,
        commit_hashes: HashMap<String, String>,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.commit_hashes = commit_hashes;
            Ok(())
        })
        .await
    }

    pub async fn update_task_base_commit_hashes(
        &self,
        id: Uuid,
        base_commit_hashes: HashMap<String, String>,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.base_commit_hashes = base_commit_hashes;
            Ok(())
        })
        .await
    }

    /// Persists the agent's session id once a turn returns a non-empty one
    /// (spec §4.5 step 3: "it becomes the new session id and is persisted").
    pub async fn update_task_session(&self, id: Uuid, session_id: Option<String>) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.session_id = session_id;
            Ok(())
        })
        .await
    }

    pub async fn update_task_backlog(
        &self,
        id: Uuid,
        prompt: Option<String>,
        timeout_minutes: Option<u32>,
        fresh_start: Option<bool>,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            if t.status != TaskStatus::Backlog {
                return Err(StoreError::StateViolation(
                    "task is not in backlog".into(),
                ));
            }
            if let Some(prompt) = prompt {
                t.prompt = prompt;
            }
            if let Some(timeout) = timeout_minutes {
                t.timeout_minutes = clamp_timeout(timeout);
            }
            if let Some(fresh_start) = fresh_start {
                t.fresh_start = fresh_start;
            }
            Ok(())
        })
        .await
    }

    pub async fn accumulate_task_usage(&self, id: Uuid, delta: Usage) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.usage.accumulate(&delta);
            Ok(())
        })
        .await
    }

    pub async fn increment_turns(&self, id: Uuid) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.turns += 1;
            Ok(())
        })
        .await
    }

    pub async fn reset_task_for_retry(
        &self,
        id: Uuid,
        new_prompt: String,
        fresh_start: bool,
    ) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            if t.prompt != new_prompt {
                t.prompt_history.push(t.prompt.clone());
            }
            t.prompt = new_prompt;
            t.fresh_start = fresh_start;
            if fresh_start {
                t.session_id = None;
            }
            t.result = None;
            t.stop_reason = None;
            t.turns = 0;
            t.worktree_paths.clear();
            t.commit_hashes.clear();
            t.base_commit_hashes.clear();
            t.branch_name.clear();
            t.status = TaskStatus::Backlog;
            Ok(())
        })
        .await
    }

    pub async fn set_task_archived(&self, id: Uuid, archived: bool) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.archived = archived;
            Ok(())
        })
        .await
    }

    pub async fn resume_task(&self, id: Uuid, timeout_minutes: Option<u32>) -> Result<Task, StoreError> {
        self.mutate(id, |t| {
            t.status = TaskStatus::InProgress;
            if let Some(timeout) = timeout_minutes {
                t.timeout_minutes = clamp_timeout(timeout);
            }
            Ok(())
        })
        .await
    }

    /// Idempotent: deleting an already-absent task is not an error.
    pub async fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.tasks.remove(&id);
        inner.events.remove(&id);
        inner.next_event_id.remove(&id);
        drop(inner);

        let dir = self.task_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.broadcast().await;
        Ok(())
    }

    pub async fn insert_event(&self, task_id: Uuid, kind: EventKind, payload: Value) -> Result<Event, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::NotFound);
        }

        let seq = {
            let next = inner.next_event_id.entry(task_id).or_insert(1);
            let seq = *next;
            *next += 1;
            seq
        };

        let event = Event {
            id: seq,
            task_id,
            kind,
            payload,
            timestamp: Utc::now(),
        };

        let trace_path = self.task_dir(task_id).join("traces").join(format!("{seq}.json"));
        let bytes = serde_json::to_vec_pretty(&event)?;
        write_atomic(&trace_path, &bytes).await?;

        inner.events.entry(task_id).or_default().push(event.clone());
        drop(inner);
        self.broadcast().await;
        Ok(event)
    }

    pub async fn get_events(&self, task_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::NotFound);
        }
        let mut events = inner.events.get(&task_id).cloned().unwrap_or_default();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    pub async fn save_turn_output(
        &self,
        task_id: Uuid,
        turn: u32,
        stdout_bytes: &[u8],
        stderr_bytes: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.outputs_dir(task_id);
        let stdout_path = dir.join(format!("turn-{turn:04}.json"));
        write_atomic(&stdout_path, stdout_bytes).await?;

        if !stderr_bytes.is_empty() {
            let stderr_path = dir.join(format!("turn-{turn:04}.stderr.txt"));
            write_atomic(&stderr_path, stderr_bytes).await?;
        }

        Ok(())
    }

    /// Level-triggered subscription: the receiver's capacity-1 channel holds
    /// at most one pending signal; subscribers re-read full state on wakeup.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }
}

async fn load_task_events(traces_dir: &Path) -> Result<Vec<Event>, StoreError> {
    let mut entries = match tokio::fs::read_dir(traces_dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut numbered: Vec<(u64, Event)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(seq) = stem.parse::<u64>() else {
            continue;
        };
        let bytes = tokio::fs::read(&path).await?;
        let Ok(event) = serde_json::from_slice::<Event>(&bytes) else {
            tracing::warn!(path = %path.display(), "skipping malformed trace file");
            continue;
        };
        numbered.push((seq, event));
    }

    numbered.sort_by_key(|(seq, _)| *seq);
    // Re-index densely starting at 1, regardless of on-disk gaps.
    Ok(numbered
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut event))| {
            event.id = i as u64 + 1;
            event
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(dir.path().to_path_buf()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_task_rejects_empty_prompt() {
        let (_dir, store) = new_store().await;
        let err = store.create_task("   ".into(), 5).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_task_clamps_timeout_and_assigns_position() {
        let (_dir, store) = new_store().await;
        let t1 = store.create_task("a".into(), 0).await.unwrap();
        assert_eq!(t1.timeout_minutes, 1);
        assert_eq!(t1.position, 0);

        let t2 = store.create_task("b".into(), 9000).await.unwrap();
        assert_eq!(t2.timeout_minutes, 1440);
        assert_eq!(t2.position, 1);
    }

    #[tokio::test]
    async fn get_task_not_found() {
        let (_dir, store) = new_store().await;
        let err = store.get_task(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn round_trips_through_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(dir.path().to_path_buf()).await.unwrap();
        let task = store.create_task("hello".into(), 5).await.unwrap();
        store
            .insert_event(task.id, EventKind::System, json!({"msg": "one"}))
            .await
            .unwrap();
        store
            .insert_event(task.id, EventKind::System, json!({"msg": "two"}))
            .await
            .unwrap();

        let reloaded = Store::load(dir.path().to_path_buf()).await.unwrap();
        let reloaded_task = reloaded.get_task(task.id).await.unwrap();
        assert_eq!(reloaded_task.prompt, "hello");

        let events = reloaded.get_events(task.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[1].id, 2);
    }

    #[tokio::test]
    async fn reset_task_for_retry_clears_everything() {
        let (_dir, store) = new_store().await;
        let task = store.create_task("A".into(), 5).await.unwrap();
        store
            .update_task_worktrees(
                task.id,
                HashMap::from([("repo".to_string(), "wt".to_string())]),
                "task/abcd1234".to_string(),
            )
            .await
            .unwrap();

        let retried = store.reset_task_for_retry(task.id, "B".into(), false).await.unwrap();
        assert_eq!(retried.prompt, "B");
        assert_eq!(retried.prompt_history, vec!["A".to_string()]);
        assert!(retried.worktree_paths.is_empty());
        assert_eq!(retried.branch_name, "");
        assert_eq!(retried.turns, 0);
        assert_eq!(retried.status, TaskStatus::Backlog);

        let retried_again = store.reset_task_for_retry(task.id, "C".into(), false).await.unwrap();
        assert_eq!(retried_again.prompt_history, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(retried_again.prompt, "C");
    }

    #[tokio::test]
    async fn delete_task_is_idempotent() {
        let (_dir, store) = new_store().await;
        let task = store.create_task("a".into(), 5).await.unwrap();
        store.delete_task(task.id).await.unwrap();
        store.delete_task(task.id).await.unwrap();
        assert!(matches!(
            store.get_task(task.id).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn subscriber_receives_signal_on_mutation() {
        let (_dir, store) = new_store().await;
        let (_id, mut rx) = store.subscribe().await;
        store.create_task("a".into(), 5).await.unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
