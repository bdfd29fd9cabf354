use crate::types::Task;
use std::path::{Path, PathBuf};

const REPORT_FILE_NAME: &str = "report.pdf";
const INVESTIGATION_FILE_NAME: &str = "package.zip";

/// Deterministic on-disk layout for downloaded artifacts. Artifacts are
/// keyed by the task's sha256 digest (directory per hash), so identical
/// files submitted under different names share one report directory. A
/// task with no sha256 yet (URL submissions whose result carried no
/// digests) falls back to the remote submission id.
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: &Path) -> Self {
        ArtifactStore {
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn report_path(&self, task: &Task) -> PathBuf {
        self.data_dir
            .join("reports")
            .join(Self::artifact_key(task))
            .join(REPORT_FILE_NAME)
    }

    pub fn investigation_path(&self, task: &Task) -> PathBuf {
        self.data_dir
            .join("investigations")
            .join(Self::artifact_key(task))
            .join(INVESTIGATION_FILE_NAME)
    }

    fn artifact_key(task: &Task) -> String {
        if task.digests.sha256.is_empty() {
            task.sandbox_id.clone()
        } else {
            task.digests.sha256.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Task, TaskKind};

    #[test]
    fn test_report_path_is_keyed_by_sha256() {
        let store = ArtifactStore::new(Path::new("/var/lib/sandgate"));
        let mut task = Task::new(1, TaskKind::File, "/tmp/a".to_string());
        task.digests.sha256 = "e3b0c442".to_string();
        task.sandbox_id = "abc".to_string();

        assert_eq!(
            store.report_path(&task),
            PathBuf::from("/var/lib/sandgate/reports/e3b0c442/report.pdf")
        );
        assert_eq!(
            store.investigation_path(&task),
            PathBuf::from("/var/lib/sandgate/investigations/e3b0c442/package.zip")
        );
    }

    #[test]
    fn test_falls_back_to_sandbox_id_without_digest() {
        let store = ArtifactStore::new(Path::new("/data"));
        let mut task = Task::new(1, TaskKind::Url, "https://example.com/x".to_string());
        task.sandbox_id = "abc".to_string();

        assert_eq!(
            store.report_path(&task),
            PathBuf::from("/data/reports/abc/report.pdf")
        );
    }

    #[test]
    fn test_identical_content_shares_a_report_directory() {
        let store = ArtifactStore::new(Path::new("/data"));
        let mut a = Task::new(1, TaskKind::File, "/tmp/a".to_string());
        let mut b = Task::new(2, TaskKind::File, "/tmp/copy-of-a".to_string());
        a.digests.sha256 = "feed".to_string();
        b.digests.sha256 = "feed".to_string();

        assert_eq!(store.report_path(&a), store.report_path(&b));
    }
}
