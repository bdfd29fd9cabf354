use crate::types::{Task, TaskId, TaskKind, TaskState};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum TaskListError {
    #[error("a live task for path {0} already exists")]
    AlreadyExists(String),
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("task {0} is still being processed")]
    NotTerminal(TaskId),
}

struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    next_number: TaskId,
}

/// Concurrency-safe registry of all live tasks. The list owns its tasks
/// exclusively; dispatchers reach them only through the scoped accessors
/// below, which keep the lock hold time free of any I/O.
///
/// Observers subscribe to a latest-wins change signal: mutations bump a
/// generation counter on a watch channel, so a slow observer sees at most
/// one pending notification and resamples the list instead of queueing
/// events.
pub struct TaskList {
    inner: Mutex<Inner>,
    change_tx: watch::Sender<u64>,
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskList {
    pub fn new() -> Self {
        let (change_tx, _) = watch::channel(0);
        TaskList {
            inner: Mutex::new(Inner {
                tasks: BTreeMap::new(),
                next_number: 1,
            }),
            change_tx,
        }
    }

    /// Register a new task for `path`. Fails with `AlreadyExists` when a
    /// live task (any state except `Error`) already covers the same path;
    /// a task that ended in `Error` does not block resubmission.
    pub fn new_task(&self, kind: TaskKind, path: &str) -> Result<TaskId, TaskListError> {
        let number = {
            let mut inner = self.inner.lock().expect("task list lock");
            let duplicate = inner
                .tasks
                .values()
                .any(|t| t.path == path && t.state != TaskState::Error);
            if duplicate {
                return Err(TaskListError::AlreadyExists(path.to_string()));
            }

            let number = inner.next_number;
            inner.next_number += 1;
            inner.tasks.insert(number, Task::new(number, kind, path.to_string()));
            number
        };

        self.notify();
        Ok(number)
    }

    /// Snapshot of a single task, if it exists.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.inner.lock().expect("task list lock").tasks.get(&id).cloned()
    }

    pub fn del_by_id(&self, id: TaskId) {
        let removed = {
            let mut inner = self.inner.lock().expect("task list lock");
            inner.tasks.remove(&id).is_some()
        };
        if removed {
            self.notify();
        }
    }

    /// Run `f` against the current id set, sorted by task number. The
    /// snapshot is taken under the lock but `f` runs after it is released,
    /// so the callback is free to call back into the list.
    pub fn process<F>(&self, f: F)
    where
        F: FnOnce(&[TaskId]),
    {
        let ids: Vec<TaskId> = {
            let inner = self.inner.lock().expect("task list lock");
            inner.tasks.keys().copied().collect()
        };
        f(&ids);
    }

    /// Scoped, lock-protected access to one task for read-modify work.
    /// The callback must not block on I/O; remote calls happen outside and
    /// batch their mutations through a second `with_task` call.
    pub fn with_task<R, F>(&self, id: TaskId, f: F) -> Result<R, TaskListError>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let result = {
            let mut inner = self.inner.lock().expect("task list lock");
            let task = inner
                .tasks
                .get_mut(&id)
                .ok_or(TaskListError::UnknownTask(id))?;
            f(task)
        };
        self.notify();
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("task list lock").tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to the change signal. The carried value is a generation
    /// counter; consumers should resample the list rather than interpret it.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    fn notify(&self) {
        self.change_tx.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_numbers_are_unique_and_increasing() {
        let list = TaskList::new();
        let a = list.new_task(TaskKind::File, "/tmp/a").unwrap();
        let b = list.new_task(TaskKind::File, "/tmp/b").unwrap();
        let c = list.new_task(TaskKind::Url, "https://example.com/x").unwrap();
        assert!(a < b && b < c);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_duplicate_path_is_rejected_while_live() {
        let list = TaskList::new();
        let id = list.new_task(TaskKind::File, "/tmp/evil.exe").unwrap();

        let err = list.new_task(TaskKind::File, "/tmp/evil.exe").unwrap_err();
        assert!(matches!(err, TaskListError::AlreadyExists(_)));
        assert_eq!(list.len(), 1);

        // A task that failed terminally no longer blocks resubmission.
        list.with_task(id, |t| t.state = TaskState::Error).unwrap();
        let id2 = list.new_task(TaskKind::File, "/tmp/evil.exe").unwrap();
        assert_ne!(id, id2);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_done_task_still_blocks_duplicate() {
        let list = TaskList::new();
        let id = list.new_task(TaskKind::File, "/tmp/sample.bin").unwrap();
        list.with_task(id, |t| t.state = TaskState::Done).unwrap();

        let err = list.new_task(TaskKind::File, "/tmp/sample.bin").unwrap_err();
        assert!(matches!(err, TaskListError::AlreadyExists(_)));
    }

    #[test]
    fn test_process_sees_sorted_snapshot() {
        let list = TaskList::new();
        for i in 0..5 {
            list.new_task(TaskKind::File, &format!("/tmp/f{i}")).unwrap();
        }
        list.del_by_id(3);

        list.process(|ids| {
            assert_eq!(ids, &[1, 2, 4, 5]);
            // The callback runs outside the lock and may re-enter the list.
            assert!(list.get(1).is_some());
        });
    }

    #[test]
    fn test_with_task_unknown_id() {
        let list = TaskList::new();
        let err = list.with_task(42, |_| ()).unwrap_err();
        assert!(matches!(err, TaskListError::UnknownTask(42)));
    }

    #[tokio::test]
    async fn test_change_notifications_coalesce() {
        let list = TaskList::new();
        let mut changes = list.changes();

        list.new_task(TaskKind::File, "/tmp/a").unwrap();
        list.new_task(TaskKind::File, "/tmp/b").unwrap();
        list.del_by_id(1);

        // Three mutations, one pending notification.
        changes.changed().await.unwrap();
        let generation = *changes.borrow_and_update();
        assert_eq!(generation, 3);
        assert!(!changes.has_changed().unwrap());
    }
}
