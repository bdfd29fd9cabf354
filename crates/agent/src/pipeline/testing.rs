//! Shared test double for the remote sandbox service.

use crate::sandbox::{AnalysisResult, SandboxClient, SandboxError, SubmissionStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scriptable in-memory `SandboxClient`. Poll statuses are consumed in
/// order; once the script runs out, the submission reads as succeeded.
pub(crate) struct MockSandbox {
    submit_id: String,
    fail_submit: bool,
    fail_report: bool,
    statuses: Mutex<VecDeque<Result<SubmissionStatus, SandboxError>>>,
    result: Mutex<AnalysisResult>,
    pub(crate) submit_calls: AtomicUsize,
    pub(crate) poll_calls: AtomicUsize,
    pub(crate) report_calls: AtomicUsize,
    pub(crate) investigation_calls: AtomicUsize,
}

impl MockSandbox {
    pub(crate) fn new(submit_id: &str) -> Self {
        MockSandbox {
            submit_id: submit_id.to_string(),
            fail_submit: false,
            fail_report: false,
            statuses: Mutex::new(VecDeque::new()),
            result: Mutex::new(AnalysisResult {
                risk_level: "norisk".to_string(),
                ..AnalysisResult::default()
            }),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            report_calls: AtomicUsize::new(0),
            investigation_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_statuses(
        self,
        statuses: Vec<Result<SubmissionStatus, SandboxError>>,
    ) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub(crate) fn with_result(self, result: AnalysisResult) -> Self {
        *self.result.lock().unwrap() = result;
        self
    }

    pub(crate) fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub(crate) fn failing_report(mut self) -> Self {
        self.fail_report = true;
        self
    }

    async fn write_artifact(dest: &Path, data: &[u8]) -> Result<(), SandboxError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, data).await?;
        Ok(())
    }
}

#[async_trait]
impl SandboxClient for MockSandbox {
    async fn submit_file(&self, _path: &Path) -> Result<String, SandboxError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_submit {
            return Err(SandboxError::RemoteStatus {
                status: 503,
                message: "submission rejected".to_string(),
            });
        }
        Ok(self.submit_id.clone())
    }

    async fn submit_url(&self, _url: &str) -> Result<String, SandboxError> {
        self.submit_file(Path::new("")).await
    }

    async fn poll_status(&self, _id: &str) -> Result<SubmissionStatus, SandboxError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SubmissionStatus::Succeeded))
    }

    async fn fetch_result(&self, _id: &str) -> Result<AnalysisResult, SandboxError> {
        Ok(self.result.lock().unwrap().clone())
    }

    async fn fetch_report(&self, _id: &str, dest: &Path) -> Result<(), SandboxError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_report {
            return Err(SandboxError::RemoteStatus {
                status: 500,
                message: "report unavailable".to_string(),
            });
        }
        Self::write_artifact(dest, b"%PDF-1.4 mock report").await
    }

    async fn fetch_investigation_package(
        &self,
        _id: &str,
        dest: &Path,
    ) -> Result<(), SandboxError> {
        self.investigation_calls.fetch_add(1, Ordering::SeqCst);
        Self::write_artifact(dest, b"PK mock package").await
    }
}
