mod task;

pub use task::{Digests, RiskLevel, Task, TaskId, TaskKind, TaskState};
