use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::sandbox::{SandboxClient, SubmissionStatus};
use crate::task_list::TaskList;
use crate::types::{RiskLevel, TaskId, TaskState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// Remote failure code for content the sandbox cannot analyze.
const UNSUPPORTED_CODE: &str = "Unsupported";

/// Polls the remote submission until the analysis settles. A still-running
/// analysis re-enqueues the task to this same stage after `poll_interval`;
/// the retry budget caps how long a submission may stay in that loop
/// (0 = unbounded, the remote's own lifecycle governs).
pub struct WaitDispatcher {
    list: Arc<TaskList>,
    client: Arc<dyn SandboxClient>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl WaitDispatcher {
    pub fn new(
        list: Arc<TaskList>,
        client: Arc<dyn SandboxClient>,
        poll_interval: Duration,
        max_poll_attempts: u32,
    ) -> Self {
        WaitDispatcher {
            list,
            client,
            poll_interval,
            max_poll_attempts,
        }
    }
}

#[async_trait]
impl Dispatcher for WaitDispatcher {
    fn stage(&self) -> Stage {
        Stage::Wait
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            None => return Ok(Flow::Halt),
        };

        self.list.with_task(id, |t| t.state = TaskState::Check)?;

        if self.max_poll_attempts > 0 && task.poll_attempts >= self.max_poll_attempts {
            return Err(DispatchError::PollBudgetExhausted(self.max_poll_attempts));
        }

        match self.client.poll_status(&task.sandbox_id).await? {
            SubmissionStatus::Succeeded => {
                self.list
                    .with_task(id, |t| t.state = TaskState::WaitForResult)?;
                Ok(Flow::Forward(Stage::Result))
            }
            SubmissionStatus::Running => {
                self.list.with_task(id, |t| {
                    t.state = TaskState::Inspected;
                    t.poll_attempts += 1;
                })?;
                Ok(Flow::Requeue(self.poll_interval))
            }
            SubmissionStatus::Failed { code, message } => {
                if code == UNSUPPORTED_CODE {
                    self.list
                        .with_task(id, |t| t.risk_level = RiskLevel::Unsupported)?;
                }
                let detail = if message.is_empty() {
                    code
                } else {
                    format!("{code}: {message}")
                };
                Err(DispatchError::AnalysisFailed(detail))
            }
        }
    }
}
