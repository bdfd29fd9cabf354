use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// Process-local, monotonically increasing task number assigned by the
/// `TaskList` at creation time.
pub type TaskId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskKind {
    #[default]
    File,
    Url,
}

/// Pipeline lifecycle state. Transitions only move forward along the
/// pipeline graph; the explicit operator Recheck is the single exception
/// and resets the task back to `New`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    New,
    Upload,
    Inspected,
    Check,
    WaitForResult,
    Report,
    Ignored,
    Done,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ignored | TaskState::Done | TaskState::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::New => "new",
            TaskState::Upload => "upload",
            TaskState::Inspected => "inspected",
            TaskState::Check => "check",
            TaskState::WaitForResult => "wait-for-result",
            TaskState::Report => "report",
            TaskState::Ignored => "ignored",
            TaskState::Done => "done",
            TaskState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Verdict classification returned by the sandbox. Only meaningful once the
/// task has reached `TaskState::Done`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RiskLevel {
    #[default]
    Unknown,
    Unsupported,
    NoRisk,
    Low,
    Medium,
    High,
    Error,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Unknown => "unknown",
            RiskLevel::Unsupported => "unsupported",
            RiskLevel::NoRisk => "no risk",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Digests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

impl Digests {
    /// Merge `other` into `self`, never replacing an already populated
    /// digest with an empty value.
    pub fn merge(&mut self, other: &Digests) {
        if self.md5.is_empty() && !other.md5.is_empty() {
            self.md5 = other.md5.clone();
        }
        if self.sha1.is_empty() && !other.sha1.is_empty() {
            self.sha1 = other.sha1.clone();
        }
        if self.sha256.is_empty() && !other.sha256.is_empty() {
            self.sha256 = other.sha256.clone();
        }
    }
}

/// One submitted file or URL and its tracked lifecycle. Tasks are owned by
/// the `TaskList` and only reachable through it.
#[derive(Clone, Debug)]
pub struct Task {
    pub number: TaskId,
    pub kind: TaskKind,
    pub path: String,
    pub state: TaskState,
    pub risk_level: RiskLevel,
    pub sandbox_id: String,
    pub message: String,
    pub digests: Digests,
    pub report: Option<PathBuf>,
    pub investigation: Option<PathBuf>,
    pub submit_time: SystemTime,
    pub poll_attempts: u32,
}

impl Task {
    pub fn new(number: TaskId, kind: TaskKind, path: String) -> Self {
        Task {
            number,
            kind,
            path,
            state: TaskState::New,
            risk_level: RiskLevel::Unknown,
            sandbox_id: String::new(),
            message: String::new(),
            digests: Digests::default(),
            report: None,
            investigation: None,
            submit_time: SystemTime::now(),
            poll_attempts: 0,
        }
    }

    /// Reset lifecycle state for an operator Recheck. The task re-enters the
    /// pipeline at Prefilter and a fresh submission is made, so the previous
    /// sandbox id and verdict are discarded. Digests are kept; they identify
    /// the content, not the submission attempt.
    pub fn reset_for_recheck(&mut self) {
        self.state = TaskState::New;
        self.risk_level = RiskLevel::Unknown;
        self.sandbox_id.clear();
        self.message.clear();
        self.poll_attempts = 0;
    }
}
