use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::sandbox::SandboxClient;
use crate::storage::ArtifactStore;
use crate::task_list::TaskList;
use crate::types::{TaskId, TaskState};
use async_trait::async_trait;
use std::sync::Arc;

/// Downloads the analysis report to its deterministic per-hash location.
/// A download failure is terminal for the task, but the verdict collected
/// by the Result stage is preserved; losing the PDF must not erase what
/// the sandbox concluded.
pub struct ReportDispatcher {
    list: Arc<TaskList>,
    client: Arc<dyn SandboxClient>,
    store: Arc<ArtifactStore>,
}

impl ReportDispatcher {
    pub fn new(
        list: Arc<TaskList>,
        client: Arc<dyn SandboxClient>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        ReportDispatcher {
            list,
            client,
            store,
        }
    }
}

#[async_trait]
impl Dispatcher for ReportDispatcher {
    fn stage(&self) -> Stage {
        Stage::Report
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            None => return Ok(Flow::Halt),
        };

        self.list.with_task(id, |t| t.state = TaskState::Report)?;

        let dest = self.store.report_path(&task);
        self.client
            .fetch_report(&task.sandbox_id, &dest)
            .await
            .map_err(DispatchError::ArtifactDownload)?;

        tracing::info!("task {} report stored at {:#?}", id, dest);
        self.list.with_task(id, |t| {
            t.report = Some(dest);
            t.state = TaskState::Done;
        })?;

        Ok(Flow::Halt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::MockSandbox;
    use crate::types::{RiskLevel, TaskKind};
    use std::sync::atomic::Ordering;

    fn listed_task(list: &TaskList) -> TaskId {
        let id = list.new_task(TaskKind::File, "/tmp/sample").unwrap();
        list.with_task(id, |t| {
            t.sandbox_id = "abc".to_string();
            t.digests.sha256 = "e3b0".to_string();
            t.risk_level = RiskLevel::High;
            t.message = "Trojan.GenKD".to_string();
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_report_is_downloaded_to_the_hash_keyed_path() {
        let dir = tempfile::tempdir().unwrap();
        let list = Arc::new(TaskList::new());
        let id = listed_task(&list);
        let sandbox = Arc::new(MockSandbox::new("abc"));
        let store = Arc::new(ArtifactStore::new(dir.path()));

        let flow = ReportDispatcher::new(Arc::clone(&list), sandbox.clone(), store)
            .process(id)
            .await
            .unwrap();
        assert!(matches!(flow, Flow::Halt));
        assert_eq!(sandbox.report_calls.load(Ordering::SeqCst), 1);

        let task = list.get(id).unwrap();
        assert_eq!(task.state, TaskState::Done);
        let report = task.report.unwrap();
        assert!(report.ends_with("reports/e3b0/report.pdf"));
        assert!(report.exists());
    }

    #[tokio::test]
    async fn test_download_failure_keeps_the_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let list = Arc::new(TaskList::new());
        let id = listed_task(&list);
        let sandbox = Arc::new(MockSandbox::new("abc").failing_report());
        let store = Arc::new(ArtifactStore::new(dir.path()));

        let err = ReportDispatcher::new(Arc::clone(&list), sandbox, store)
            .process(id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ArtifactDownload(_)));

        // The dispatcher itself never touches the verdict fields.
        let task = list.get(id).unwrap();
        assert_eq!(task.risk_level, RiskLevel::High);
        assert_eq!(task.message, "Trojan.GenKD");
        assert!(task.report.is_none());
    }
}
