use serde::{Deserialize, Serialize};

/// The named queues. Routing work to a queue is a scheduling decision, not a
/// semantic one — every queue runs the same engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Default,
    Integrations,
    Analytics,
    Messaging,
    Bot,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Default => "default",
            Queue::Integrations => "integrations",
            Queue::Analytics => "analytics",
            Queue::Messaging => "messaging",
            Queue::Bot => "bot",
        }
    }

    pub const ALL: [Queue; 5] = [
        Queue::Default,
        Queue::Integrations,
        Queue::Analytics,
        Queue::Messaging,
        Queue::Bot,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_after: String,
    pub dedup_key: Option<String>,
    pub last_error: Option<String>,
}
