use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::sandbox::SandboxClient;
use crate::storage::ArtifactStore;
use crate::task_list::TaskList;
use crate::types::{TaskId, TaskState};
use async_trait::async_trait;
use std::sync::Arc;

/// On-demand download of the forensic investigation package. Entered only
/// through the operator control surface, never as part of the automatic
/// pipeline walk.
pub struct InvestigationDispatcher {
    list: Arc<TaskList>,
    client: Arc<dyn SandboxClient>,
    store: Arc<ArtifactStore>,
}

impl InvestigationDispatcher {
    pub fn new(
        list: Arc<TaskList>,
        client: Arc<dyn SandboxClient>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        InvestigationDispatcher {
            list,
            client,
            store,
        }
    }
}

#[async_trait]
impl Dispatcher for InvestigationDispatcher {
    fn stage(&self) -> Stage {
        Stage::Investigation
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            None => return Ok(Flow::Halt),
        };

        // Repeated operator requests are a no-op once the package exists.
        if task.investigation.is_some() {
            return Ok(Flow::Halt);
        }

        let dest = self.store.investigation_path(&task);
        self.client
            .fetch_investigation_package(&task.sandbox_id, &dest)
            .await
            .map_err(DispatchError::ArtifactDownload)?;

        tracing::info!("task {} investigation package stored at {:#?}", id, dest);
        self.list.with_task(id, |t| {
            t.investigation = Some(dest);
            t.state = TaskState::Done;
        })?;

        Ok(Flow::Halt)
    }
}
