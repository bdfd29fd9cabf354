use crate::types::Digests;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

mod http;

pub use http::HttpSandboxClient;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("unknown submission status {0:?}")]
    UnknownStatus(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote-reported lifecycle of one submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionStatus {
    Running,
    Succeeded,
    Failed { code: String, message: String },
}

/// Analysis verdict as reported by the sandbox. `risk_level` carries the
/// remote's own verdict token; mapping it to the local enum happens in the
/// result dispatcher, which fails closed on values it does not know.
#[derive(Clone, Debug, Default)]
pub struct AnalysisResult {
    pub risk_level: String,
    pub digests: Digests,
    pub detection_names: Vec<String>,
    pub threat_types: Vec<String>,
}

/// Opaque remote sandbox-analysis service. The pipeline only ever talks to
/// this trait; the HTTP implementation below is wired in at startup and
/// tests substitute their own.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn submit_file(&self, path: &Path) -> Result<String, SandboxError>;

    async fn submit_url(&self, url: &str) -> Result<String, SandboxError>;

    async fn poll_status(&self, id: &str) -> Result<SubmissionStatus, SandboxError>;

    async fn fetch_result(&self, id: &str) -> Result<AnalysisResult, SandboxError>;

    async fn fetch_report(&self, id: &str, dest: &Path) -> Result<(), SandboxError>;

    async fn fetch_investigation_package(&self, id: &str, dest: &Path)
        -> Result<(), SandboxError>;
}
