use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::sandbox::SandboxClient;
use crate::task_list::TaskList;
use crate::types::{RiskLevel, TaskId, TaskState};
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches the analysis verdict and remote digests. The task always
/// continues to the Report stage afterwards; a report is retrieved even
/// for a clean verdict.
pub struct ResultDispatcher {
    list: Arc<TaskList>,
    client: Arc<dyn SandboxClient>,
}

impl ResultDispatcher {
    pub fn new(list: Arc<TaskList>, client: Arc<dyn SandboxClient>) -> Self {
        ResultDispatcher { list, client }
    }
}

/// Map the remote verdict token to the local enum. Anything outside the
/// four known verdicts is refused; a misclassified verdict must never
/// default to something that reads as a result.
pub(crate) fn map_risk_level(remote: &str) -> Option<RiskLevel> {
    match remote.to_ascii_lowercase().as_str() {
        "high" => Some(RiskLevel::High),
        "medium" => Some(RiskLevel::Medium),
        "low" => Some(RiskLevel::Low),
        "norisk" | "no_risk" => Some(RiskLevel::NoRisk),
        _ => None,
    }
}

#[async_trait]
impl Dispatcher for ResultDispatcher {
    fn stage(&self) -> Stage {
        Stage::Result
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            None => return Ok(Flow::Halt),
        };

        self.list.with_task(id, |t| t.state = TaskState::Check)?;

        let result = self.client.fetch_result(&task.sandbox_id).await?;

        // Record the remote digests before looking at the verdict; they
        // identify the content even when the verdict turns out unusable.
        self.list
            .with_task(id, |t| t.digests.merge(&result.digests))?;

        let risk = map_risk_level(&result.risk_level)
            .ok_or_else(|| DispatchError::UnknownRiskLevel(result.risk_level.clone()))?;

        let message = if risk == RiskLevel::NoRisk {
            String::new()
        } else {
            result
                .detection_names
                .iter()
                .chain(result.threat_types.iter())
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        tracing::info!("task {} verdict: {} ({})", id, risk, message);
        self.list.with_task(id, |t| {
            t.risk_level = risk;
            t.message = message;
        })?;

        Ok(Flow::Forward(Stage::Report))
    }
}
