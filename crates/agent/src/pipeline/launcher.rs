use super::{
    DispatchError, Dispatcher, Flow, Stage, StageReceiver, StageTx,
};
use crate::task_list::{TaskList, TaskListError};
use crate::types::{RiskLevel, TaskId, TaskKind, TaskState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker pool size per stage. Prefilter is local fs work and stays
/// single; the remote-facing stages get wider pools because their workers
/// spend most of their time waiting on the sandbox service.
#[derive(Clone, Copy, Debug)]
pub struct WorkerCounts {
    pub prefilter: usize,
    pub upload: usize,
    pub wait: usize,
    pub result: usize,
    pub report: usize,
    pub investigation: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        WorkerCounts {
            prefilter: 1,
            upload: 5,
            wait: 5,
            result: 5,
            report: 2,
            investigation: 1,
        }
    }
}

impl WorkerCounts {
    fn for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Prefilter => self.prefilter,
            Stage::Upload => self.upload,
            Stage::Wait => self.wait,
            Stage::Result => self.result,
            Stage::Report => self.report,
            Stage::Investigation => self.investigation,
        }
    }
}

/// Cloneable entry point for putting work into the pipeline. Held by the
/// submit listener and by whatever operator surface drives rechecks,
/// deletions and investigation requests.
#[derive(Clone)]
pub struct PipelineHandle {
    list: Arc<TaskList>,
    tx: StageTx,
}

impl PipelineHandle {
    pub fn new(list: Arc<TaskList>, tx: StageTx) -> Self {
        PipelineHandle { list, tx }
    }

    pub fn task_list(&self) -> &Arc<TaskList> {
        &self.list
    }

    /// Register a new task and push it into Prefilter. Path-level dedup
    /// applies: a live task for the same path rejects the submission.
    pub async fn submit(&self, kind: TaskKind, path: &str) -> Result<TaskId, TaskListError> {
        let id = self.list.new_task(kind, path)?;
        tracing::info!("task {} accepted: {:?} {}", id, kind, path);
        self.tx.send(Stage::Prefilter, id).await;
        Ok(id)
    }

    /// Reset a task and run it through the pipeline again as a fresh
    /// submission. The previous verdict is discarded. Only terminal tasks
    /// can be rechecked; a task still moving through the pipeline already
    /// sits in some stage queue, and re-injecting it would put the same id
    /// in two queues at once. The check and reset happen under one lock
    /// hold, so concurrent rechecks cannot both pass the gate.
    pub async fn recheck(&self, id: TaskId) -> Result<(), TaskListError> {
        let reset = self.list.with_task(id, |t| {
            if t.state.is_terminal() {
                t.reset_for_recheck();
                true
            } else {
                false
            }
        })?;
        if !reset {
            return Err(TaskListError::NotTerminal(id));
        }
        tracing::info!("task {} recheck requested", id);
        self.tx.send(Stage::Prefilter, id).await;
        Ok(())
    }

    pub fn delete(&self, id: TaskId) {
        self.list.del_by_id(id);
    }

    /// Queue an on-demand investigation package download. Only a task whose
    /// analysis completed has a package to fetch; a task still in flight is
    /// refused rather than double-queued.
    pub async fn request_investigation(&self, id: TaskId) -> Result<(), TaskListError> {
        let task = self.list.get(id).ok_or(TaskListError::UnknownTask(id))?;
        if !task.state.is_terminal() {
            return Err(TaskListError::NotTerminal(id));
        }
        if task.state != TaskState::Done || task.sandbox_id.is_empty() {
            tracing::warn!("task {} has no completed analysis, investigation skipped", id);
            return Ok(());
        }
        self.tx.send(Stage::Investigation, id).await;
        Ok(())
    }
}

/// Owns the spawned worker pools. Dropping the launcher detaches the
/// workers; call [`Launcher::shutdown`] for an orderly stop that drains
/// the already queued ids first.
pub struct Launcher {
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Launcher {
    /// Spawn the worker pools for every dispatcher. Each pool shares one
    /// stage receiver; idle workers take turns locking it.
    pub fn start(
        list: Arc<TaskList>,
        dispatchers: Vec<Arc<dyn Dispatcher>>,
        counts: WorkerCounts,
        tx: StageTx,
        rx: &super::StageRx,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut workers = Vec::new();

        for dispatcher in dispatchers {
            let stage = dispatcher.stage();
            for worker in 0..counts.for_stage(stage) {
                workers.push(tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&dispatcher),
                    rx.receiver(stage),
                    tx.clone(),
                    Arc::clone(&list),
                    shutdown_tx.subscribe(),
                )));
            }
        }

        Launcher {
            workers,
            shutdown_tx,
        }
    }

    /// Signal every worker to stop, then wait for them. Workers finish the
    /// task in hand and drain ids already sitting in their stage queue;
    /// Wait-stage tasks give up their poll loop instead of sleeping.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::warn!("pipeline worker panicked: {}", err);
            }
        }
        tracing::info!("pipeline stopped");
    }
}

async fn worker_loop(
    worker: usize,
    dispatcher: Arc<dyn Dispatcher>,
    rx: StageReceiver,
    tx: StageTx,
    list: Arc<TaskList>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stage = dispatcher.stage();
    tracing::debug!("{} worker {} started", stage, worker);

    loop {
        let id = {
            let mut rx = rx.lock().await;
            if *shutdown.borrow() {
                // Drain what was queued before the signal, then exit.
                match rx.try_recv() {
                    Ok(id) => id,
                    Err(_) => break,
                }
            } else {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(id) => id,
                        None => break,
                    },
                    _ = shutdown.changed() => continue,
                }
            }
        };

        let shutting_down = *shutdown.borrow();
        match dispatcher.process(id).await {
            Ok(flow) => apply_flow(stage, id, flow, &tx, &list, shutting_down).await,
            Err(err) => fail_task(&list, stage, id, &err),
        }
    }

    tracing::debug!("{} worker {} stopped", stage, worker);
}

/// Perform the transition a dispatcher asked for. All channel sends happen
/// here, so a task id sits in at most one stage queue at a time.
async fn apply_flow(
    stage: Stage,
    id: TaskId,
    flow: Flow,
    tx: &StageTx,
    list: &Arc<TaskList>,
    shutting_down: bool,
) {
    match flow {
        Flow::Forward(next) => {
            debug_assert_eq!(stage.successor(), Some(next));
            if !tx.send(next, id).await {
                tracing::warn!("task {} dropped: {} queue closed", id, next);
            }
        }
        Flow::Requeue(delay) => {
            debug_assert!(stage.may_requeue());
            if shutting_down {
                tracing::debug!("task {} poll loop abandoned for shutdown", id);
                return;
            }
            tokio::time::sleep(delay).await;
            if !tx.send(stage, id).await {
                tracing::warn!("task {} dropped: {} queue closed", id, stage);
            }
        }
        Flow::Expand(paths) => {
            // The directory placeholder made it this far; replace it with
            // one task per discovered file. The feed runs off-worker: the
            // discovered files land back in this stage's own queue, and a
            // directory larger than the queue capacity would otherwise
            // block the Prefilter worker against itself.
            list.del_by_id(id);
            let tx = tx.clone();
            let list = Arc::clone(list);
            tokio::spawn(async move {
                for path in paths {
                    let path = path.to_string_lossy();
                    match list.new_task(TaskKind::File, &path) {
                        Ok(new_id) => {
                            tx.send(Stage::Prefilter, new_id).await;
                        }
                        Err(TaskListError::AlreadyExists(_)) => {
                            tracing::debug!("skipping {}: already tracked", path);
                        }
                        Err(err) => {
                            tracing::warn!("cannot register {}: {}", path, err);
                        }
                    }
                }
            });
        }
        Flow::Halt => {}
    }
}

/// Terminal error handling for a dispatch failure. The verdict fields are
/// left alone: a task that failed after the Result stage keeps what the
/// sandbox concluded, and the error detail is appended to the message
/// instead of replacing it.
fn fail_task(list: &TaskList, stage: Stage, id: TaskId, err: &DispatchError) {
    tracing::error!("task {} failed in {} stage: {}", id, stage, err);

    let detail = err.to_string();
    let updated = list.with_task(id, |t| {
        t.state = TaskState::Error;
        if t.risk_level == RiskLevel::Unknown {
            t.risk_level = RiskLevel::Error;
        }
        if t.message.is_empty() {
            t.message = detail;
        } else {
            t.message = format!("{}; {}", t.message, detail);
        }
    });
    if updated.is_err() {
        tracing::debug!("task {} removed before its failure was recorded", id);
    }
}
