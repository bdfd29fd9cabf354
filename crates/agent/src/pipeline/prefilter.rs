use super::{DispatchError, Dispatcher, Flow, Stage};
use crate::digest;
use crate::ignore::IgnoreList;
use crate::task_list::TaskList;
use crate::types::{TaskId, TaskKind, TaskState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Version-control metadata is never submitted for analysis.
const VCS_DIRS: [&str; 3] = [".git", ".svn", ".hg"];

/// Local pre-submission checks: path existence, directory expansion and
/// ignore-mask filtering. The only stage that touches the local filesystem.
pub struct PrefilterDispatcher {
    list: Arc<TaskList>,
    ignore: IgnoreList,
}

impl PrefilterDispatcher {
    pub fn new(list: Arc<TaskList>, ignore: IgnoreList) -> Self {
        PrefilterDispatcher { list, ignore }
    }
}

#[async_trait]
impl Dispatcher for PrefilterDispatcher {
    fn stage(&self) -> Stage {
        Stage::Prefilter
    }

    async fn process(&self, id: TaskId) -> Result<Flow, DispatchError> {
        let task = match self.list.get(id) {
            Some(task) => task,
            // Deleted while queued; nothing to do.
            None => return Ok(Flow::Halt),
        };

        // URL submissions have no local file to check or hash.
        if task.kind == TaskKind::Url {
            return Ok(Flow::Forward(Stage::Upload));
        }

        let path = PathBuf::from(&task.path);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(DispatchError::PathAccess)?;

        if meta.is_dir() {
            let files = tokio::task::spawn_blocking(move || discover_files(&path))
                .await
                .map_err(|err| {
                    DispatchError::PathAccess(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        err,
                    ))
                })?
                .map_err(DispatchError::PathAccess)?;
            tracing::debug!("task {} is a directory; discovered {} files", id, files.len());
            return Ok(Flow::Expand(files));
        }

        if !meta.is_file() {
            return Err(DispatchError::NotRegularFile);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.ignore.matches(&file_name) {
            tracing::debug!("task {} matches an ignore mask; skipping", id);
            self.list
                .with_task(id, |t| t.state = TaskState::Ignored)?;
            return Ok(Flow::Halt);
        }

        // Digests are opportunistic; a hashing failure is not fatal, the
        // remote-reported digests can still fill the gap later.
        match tokio::task::spawn_blocking({
            let path = path.clone();
            move || digest::hash_file(&path)
        })
        .await
        {
            Ok(Ok(digests)) => {
                self.list.with_task(id, |t| t.digests.merge(&digests))?;
            }
            Ok(Err(err)) => {
                tracing::warn!("failed to hash {:#?}: {}", path, err);
            }
            Err(err) => {
                tracing::warn!("hashing task panicked for {:#?}: {}", path, err);
            }
        }

        Ok(Flow::Forward(Stage::Upload))
    }
}

/// Walk `root` and collect every regular file, skipping version-control
/// metadata directories. Pure filesystem walk; task creation for the
/// discovered paths happens in the worker loop.
fn discover_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                let name = entry.file_name();
                if VCS_DIRS.iter().any(|vcs| name == *vcs) {
                    continue;
                }
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
