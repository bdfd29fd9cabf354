//! Local submission endpoint.
//!
//! A Unix domain socket accepts newline-delimited submission records from
//! local clients (one record per line, several lines per connection are
//! fine). A record is either a filesystem path or an http(s) URL; the
//! listener classifies it and hands it to the pipeline. The reserved
//! `STOP` record shuts the listener down.

use crate::pipeline::PipelineHandle;
use crate::task_list::TaskListError;
use crate::types::TaskKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Reserved record that stops the listener. Never a valid submission.
pub const STOP_SENTINEL: &str = "STOP";

/// Bind the submit socket and start serving connections. A stale socket
/// file from an unclean previous run is removed first; anything else
/// sitting at the path is left alone and surfaces as a bind error.
pub async fn spawn_submit_listener(
    socket_path: PathBuf,
    handle: PipelineHandle,
) -> eyre::Result<JoinHandle<()>> {
    use std::os::unix::fs::FileTypeExt;

    if let Ok(meta) = std::fs::symlink_metadata(&socket_path) {
        if meta.file_type().is_socket() {
            std::fs::remove_file(&socket_path)?;
        } else {
            tracing::warn!("{:#?} exists and is not a socket", socket_path);
        }
    }
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!("submit listener on {:#?}", socket_path);

    Ok(tokio::spawn(async move {
        accept_loop(listener, handle).await;
        if let Err(err) = std::fs::remove_file(&socket_path) {
            tracing::debug!("could not remove {:#?}: {}", socket_path, err);
        }
        tracing::info!("submit listener stopped");
    }))
}

async fn accept_loop(listener: UnixListener, handle: PipelineHandle) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(err) => {
                tracing::error!("submit accept failed: {}", err);
                continue;
            }
        };
        if serve_connection(stream, &handle).await {
            break;
        }
    }
}

/// Read records off one connection. Returns true when the STOP sentinel
/// was received and the accept loop should exit.
async fn serve_connection(stream: UnixStream, handle: &PipelineHandle) -> bool {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!("submit read failed: {}", err);
                return false;
            }
        };

        let record = line.trim();
        if record.is_empty() {
            continue;
        }
        if record == STOP_SENTINEL {
            tracing::info!("stop sentinel received");
            return true;
        }

        match handle.submit(classify_record(record), record).await {
            Ok(id) => tracing::debug!("record accepted as task {}", id),
            // A path already being tracked is not the submitter's problem.
            Err(TaskListError::AlreadyExists(path)) => {
                tracing::debug!("record for {} dropped: already tracked", path);
            }
            Err(err) => tracing::warn!("record rejected: {}", err),
        }
    }
}

/// Decide whether a record names a URL or a local path. Only http(s) URLs
/// are treated as remote; anything else, including other URL-looking
/// strings, is taken as a filesystem path.
fn classify_record(record: &str) -> TaskKind {
    match url::Url::parse(record) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => TaskKind::Url,
        _ => TaskKind::File,
    }
}

/// Connect to a running listener and ask it to stop. Used by the agent's
/// own shutdown path and by the control CLI.
pub async fn send_stop(socket_path: &Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(STOP_SENTINEL.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{stage_channels, Stage};
    use crate::task_list::TaskList;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn pipeline() -> (PipelineHandle, crate::pipeline::StageRx, Arc<TaskList>) {
        let list = Arc::new(TaskList::new());
        let (tx, rx) = stage_channels(16);
        (PipelineHandle::new(Arc::clone(&list), tx), rx, list)
    }

    async fn send_lines(path: &Path, lines: &[&str]) {
        let mut stream = UnixStream::connect(path).await.unwrap();
        for line in lines {
            stream.write_all(line.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
        }
        stream.shutdown().await.unwrap();
    }

    #[test]
    fn test_record_classification() {
        assert_eq!(classify_record("https://example.com/x"), TaskKind::Url);
        assert_eq!(classify_record("http://example.com"), TaskKind::Url);
        assert_eq!(classify_record("/tmp/evil.exe"), TaskKind::File);
        assert_eq!(classify_record("C:\\samples\\evil.exe"), TaskKind::File);
        assert_eq!(classify_record("ftp://example.com/x"), TaskKind::File);
    }

    #[tokio::test]
    async fn test_records_become_prefilter_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("submit.sock");
        let (handle, rx, list) = pipeline();

        let listener = spawn_submit_listener(socket.clone(), handle).await.unwrap();
        send_lines(&socket, &["/tmp/evil.exe", "https://example.com/x"]).await;
        send_lines(&socket, &[STOP_SENTINEL]).await;
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(list.len(), 2);
        let prefilter = rx.receiver(Stage::Prefilter);
        let mut queued = prefilter.lock().await;
        assert!(queued.recv().await.is_some());
        assert!(queued.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_records_are_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("submit.sock");
        let (handle, _rx, list) = pipeline();

        let listener = spawn_submit_listener(socket.clone(), handle).await.unwrap();
        send_lines(&socket, &["/tmp/evil.exe", "/tmp/evil.exe", ""]).await;
        send_stop(&socket).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("submit.sock");
        // An unclean shutdown leaves the socket file behind.
        drop(UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let (handle, _rx, _list) = pipeline();
        let listener = spawn_submit_listener(socket.clone(), handle).await.unwrap();
        send_stop(&socket).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_regular_file_at_socket_path_is_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("submit.sock");
        std::fs::write(&socket, b"not a socket").unwrap();

        let (handle, _rx, _list) = pipeline();
        assert!(spawn_submit_listener(socket.clone(), handle).await.is_err());
        assert_eq!(std::fs::read(&socket).unwrap(), b"not a socket");
    }
}
