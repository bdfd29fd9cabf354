use super::{AnalysisResult, SandboxClient, SandboxError, SubmissionStatus};
use crate::types::Digests;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const API_KEY_HEADER: &str = "X-Api-Key";

/// REST client for the sandbox vendor API. All operations are keyed by the
/// submission id the service assigns at upload time.
pub struct HttpSandboxClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    submission_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultResponse {
    #[serde(default)]
    risk_level: String,
    #[serde(default)]
    md5: String,
    #[serde(default)]
    sha1: String,
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    detection_names: Vec<String>,
    #[serde(default)]
    threat_types: Vec<String>,
}

impl HttpSandboxClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        HttpSandboxClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(API_KEY_HEADER, &self.api_key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SandboxError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(SandboxError::RemoteStatus {
            status: status.as_u16(),
            message,
        })
    }

    /// Download a response body to `dest`, writing through a
    /// submission-tagged `.tmp` file. A partially written artifact is never
    /// visible under its final name, and concurrent downloads into the same
    /// hash directory never share a temp file.
    async fn download_to(
        mut resp: reqwest::Response,
        id: &str,
        dest: &Path,
    ) -> Result<(), SandboxError> {
        if let Some(parent) = dest.parent() {
            if let Ok(false) = tokio::fs::try_exists(parent).await {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = tmp_download_path(dest, id);
        let fd = tokio::fs::File::create(&tmp_path).await?;
        let mut fd = tokio::io::BufWriter::new(fd);

        while let Some(chunk) = resp.chunk().await? {
            fd.write_all(&chunk).await?;
        }
        fd.flush().await?;

        tokio::fs::rename(&tmp_path, dest).await?;
        tracing::debug!("artifact saved to {:#?}", dest);
        Ok(())
    }
}

fn tmp_download_path(dest: &Path, id: &str) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    dest.with_file_name(format!("{file_name}.{id}.tmp"))
}

fn parse_status(resp: StatusResponse) -> Result<SubmissionStatus, SandboxError> {
    match resp.status.as_str() {
        "running" => Ok(SubmissionStatus::Running),
        "succeeded" => Ok(SubmissionStatus::Succeeded),
        "failed" => Ok(SubmissionStatus::Failed {
            code: resp.error_code,
            message: resp.error_message,
        }),
        // An unrecognized status is a hard error; a misread lifecycle must
        // not be mistaken for progress.
        other => Err(SandboxError::UnknownStatus(other.to_string())),
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn submit_file(&self, path: &Path) -> Result<String, SandboxError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string());
        let data = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(data).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .request(self.client.post(self.url("/v1/submissions")))
            .multipart(form)
            .send()
            .await?;
        let resp: SubmissionResponse = Self::check(resp).await?.json().await?;
        Ok(resp.submission_id)
    }

    async fn submit_url(&self, url: &str) -> Result<String, SandboxError> {
        let resp = self
            .request(self.client.post(self.url("/v1/submissions/url")))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        let resp: SubmissionResponse = Self::check(resp).await?.json().await?;
        Ok(resp.submission_id)
    }

    async fn poll_status(&self, id: &str) -> Result<SubmissionStatus, SandboxError> {
        let resp = self
            .request(
                self.client
                    .get(self.url(&format!("/v1/submissions/{id}/status"))),
            )
            .send()
            .await?;
        let resp: StatusResponse = Self::check(resp).await?.json().await?;
        parse_status(resp)
    }

    async fn fetch_result(&self, id: &str) -> Result<AnalysisResult, SandboxError> {
        let resp = self
            .request(
                self.client
                    .get(self.url(&format!("/v1/submissions/{id}/result"))),
            )
            .send()
            .await?;
        let resp: ResultResponse = Self::check(resp).await?.json().await?;
        Ok(AnalysisResult {
            risk_level: resp.risk_level,
            digests: Digests {
                md5: resp.md5,
                sha1: resp.sha1,
                sha256: resp.sha256,
            },
            detection_names: resp.detection_names,
            threat_types: resp.threat_types,
        })
    }

    async fn fetch_report(&self, id: &str, dest: &Path) -> Result<(), SandboxError> {
        let resp = self
            .request(
                self.client
                    .get(self.url(&format!("/v1/submissions/{id}/report"))),
            )
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Self::download_to(resp, id, dest).await
    }

    async fn fetch_investigation_package(
        &self,
        id: &str,
        dest: &Path,
    ) -> Result<(), SandboxError> {
        let resp = self
            .request(
                self.client
                    .get(self.url(&format!("/v1/submissions/{id}/investigation-package"))),
            )
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Self::download_to(resp, id, dest).await
    }
}
