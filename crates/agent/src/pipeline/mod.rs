//! Task dispatch pipeline.
//!
//! A submitted item moves through a fixed sequence of stages, each backed
//! by a bounded channel of task ids and serviced by its own worker pool:
//!
//! ```text
//! submit -> Prefilter -> Upload -> Wait -> Result -> Report -> Done
//!                          (Wait re-enqueues itself while the remote
//!                           analysis is still running)
//! ```
//!
//! The Investigation stage sits off to the side; it is only entered on
//! explicit operator request for a completed task.
//!
//! Dispatchers never touch the channels directly. Each one returns a
//! [`Flow`] describing the single transition it wants, and the worker loop
//! in [`launcher`] performs the send. That keeps "a task id lives in at
//! most one stage channel" true by construction and makes the transition
//! policy a testable function instead of ad hoc goroutine-style plumbing.

use crate::sandbox::SandboxError;
use crate::task_list::TaskListError;
use crate::types::TaskId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

mod investigation;
mod launcher;
mod prefilter;
mod report;
mod result;
#[cfg(test)]
pub(crate) mod testing;
mod upload;
mod wait;

pub use investigation::InvestigationDispatcher;
pub use launcher::{Launcher, PipelineHandle, WorkerCounts};
pub use prefilter::PrefilterDispatcher;
pub use report::ReportDispatcher;
pub use result::ResultDispatcher;
pub use upload::UploadDispatcher;
pub use wait::WaitDispatcher;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Pipeline stages in order. `Done` is a terminal task state, not a stage,
/// so it does not appear here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Prefilter,
    Upload,
    Wait,
    Result,
    Report,
    Investigation,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Prefilter,
        Stage::Upload,
        Stage::Wait,
        Stage::Result,
        Stage::Report,
        Stage::Investigation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prefilter => "prefilter",
            Stage::Upload => "upload",
            Stage::Wait => "wait",
            Stage::Result => "result",
            Stage::Report => "report",
            Stage::Investigation => "investigation",
        }
    }

    /// The forward transition each stage is allowed to make. Report and
    /// Investigation terminate the pipeline.
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Stage::Prefilter => Some(Stage::Upload),
            Stage::Upload => Some(Stage::Wait),
            Stage::Wait => Some(Stage::Result),
            Stage::Result => Some(Stage::Report),
            Stage::Report => None,
            Stage::Investigation => None,
        }
    }

    /// Only the Wait stage may re-enqueue a task to itself; that self-loop
    /// is the poll retry policy.
    pub fn may_requeue(&self) -> bool {
        matches!(self, Stage::Wait)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The single transition a dispatcher requests for a processed task.
#[derive(Debug)]
pub enum Flow {
    /// Push the task id to the given stage channel.
    Forward(Stage),
    /// Re-enqueue to the same stage after the given delay (Wait self-loop).
    Requeue(Duration),
    /// The task was a directory: drop the placeholder and create one task
    /// per discovered file, each re-entering Prefilter.
    Expand(Vec<PathBuf>),
    /// Terminal; the dispatcher already recorded the final state.
    Halt,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("cannot access path: {0}")]
    PathAccess(std::io::Error),

    #[error("not a regular file")]
    NotRegularFile,

    #[error("sandbox request failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("unknown risk level {0:?}")]
    UnknownRiskLevel(String),

    #[error("no verdict after {0} poll attempts")]
    PollBudgetExhausted(u32),

    #[error("report download failed: {0}")]
    ArtifactDownload(SandboxError),

    #[error(transparent)]
    List(#[from] TaskListError),
}

/// One pipeline stage handler: consume a task id, act on the task, and
/// report the transition. Errors never kill the worker; the worker loop
/// terminates the task and keeps serving its channel.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError>;
}

type StageReceiver = Arc<Mutex<mpsc::Receiver<TaskId>>>;

/// Sender half of every stage channel. Clones are held by the listener,
/// the control-surface handle, and the worker loops for forwarding.
#[derive(Clone)]
pub struct StageTx {
    senders: [mpsc::Sender<TaskId>; 6],
}

impl StageTx {
    /// Push a task id to a stage queue. Blocks when the queue is full;
    /// backpressure is the contract, work is never dropped.
    pub async fn send(&self, stage: Stage, id: TaskId) -> bool {
        self.senders[stage.index()].send(id).await.is_ok()
    }
}

/// Receiver half, one shared receiver per stage. Workers of the same pool
/// take turns locking it; the mpsc channel itself provides the hand-off.
pub struct StageRx {
    receivers: [StageReceiver; 6],
}

impl StageRx {
    pub fn receiver(&self, stage: Stage) -> StageReceiver {
        Arc::clone(&self.receivers[stage.index()])
    }
}

/// Build the fixed set of bounded stage channels.
pub fn stage_channels(capacity: usize) -> (StageTx, StageRx) {
    let mut senders = Vec::with_capacity(Stage::ALL.len());
    let mut receivers = Vec::with_capacity(Stage::ALL.len());
    for _ in Stage::ALL {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(tx);
        receivers.push(Arc::new(Mutex::new(rx)));
    }

    let senders: [mpsc::Sender<TaskId>; 6] = senders.try_into().expect("six stage senders");
    let receivers: [StageReceiver; 6] = receivers.try_into().expect("six stage receivers");

    (StageTx { senders }, StageRx { receivers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_is_linear() {
        assert_eq!(Stage::Prefilter.successor(), Some(Stage::Upload));
        assert_eq!(Stage::Upload.successor(), Some(Stage::Wait));
        assert_eq!(Stage::Wait.successor(), Some(Stage::Result));
        assert_eq!(Stage::Result.successor(), Some(Stage::Report));
        assert_eq!(Stage::Report.successor(), None);
        assert_eq!(Stage::Investigation.successor(), None);
    }

    #[test]
    fn test_only_wait_may_requeue() {
        for stage in Stage::ALL {
            assert_eq!(stage.may_requeue(), stage == Stage::Wait, "{stage}");
        }
    }

    #[tokio::test]
    async fn test_full_channel_applies_backpressure() {
        let (tx, rx) = stage_channels(2);

        assert!(tx.send(Stage::Upload, 1).await);
        assert!(tx.send(Stage::Upload, 2).await);

        // The queue is full: a third send does not complete until a
        // consumer drains an id. No drop, no silent loss.
        let pending = tx.send(Stage::Upload, 3);
        tokio::pin!(pending);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut pending)
                .await
                .is_err()
        );

        let receiver = rx.receiver(Stage::Upload);
        assert_eq!(receiver.lock().await.recv().await, Some(1));
        assert!(pending.await);
    }
}
