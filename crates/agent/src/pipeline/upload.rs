use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::sandbox::SandboxClient;
use crate::task_list::TaskList;
use crate::types::{TaskId, TaskKind, TaskState};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Submits the item to the remote sandbox. A failed upload is terminal;
/// the operator retries through an explicit Recheck, never automatically.
pub struct UploadDispatcher {
    list: Arc<TaskList>,
    client: Arc<dyn SandboxClient>,
}

impl UploadDispatcher {
    pub fn new(list: Arc<TaskList>, client: Arc<dyn SandboxClient>) -> Self {
        UploadDispatcher { list, client }
    }
}

#[async_trait]
impl Dispatcher for UploadDispatcher {
    fn stage(&self) -> Stage {
        Stage::Upload
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            None => return Ok(Flow::Halt),
        };

        self.list.with_task(id, |t| t.state = TaskState::Upload)?;

        let sandbox_id = match task.kind {
            TaskKind::File => self.client.submit_file(Path::new(&task.path)).await?,
            TaskKind::Url => self.client.submit_url(&task.path).await?,
        };

        tracing::info!("task {} submitted; sandbox id {}", id, sandbox_id);
        self.list.with_task(id, |t| {
            t.sandbox_id = sandbox_id;
            t.state = TaskState::Inspected;
        })?;

        Ok(Flow::Forward(Stage::Wait))
    }
}
