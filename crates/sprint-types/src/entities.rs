use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Stopped,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub max_cycles: i64,
    pub cycles_completed: i64,
    pub status: String,
}

/// The closed set of statuses a Story may hold. Commands and BackgroundTasks
/// accept free-form status strings by design; Story does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Blocked,
    Skipped,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::InProgress => "in-progress",
            StoryStatus::Done => "done",
            StoryStatus::Failed => "failed",
            StoryStatus::Blocked => "blocked",
            StoryStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => StoryStatus::Pending,
            "in-progress" => StoryStatus::InProgress,
            "done" => StoryStatus::Done,
            "failed" => StoryStatus::Failed,
            "blocked" => StoryStatus::Blocked,
            "skipped" => StoryStatus::Skipped,
            _ => return None,
        })
    }

    /// Transitions into any of these three set `ended_at` (invariant ii).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StoryStatus::Done | StoryStatus::Failed | StoryStatus::Blocked
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    pub batch_id: i64,
    pub story_key: String,
    pub epic_id: String,
    pub status: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub story_id: i64,
    pub command: String,
    pub task_id: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub status: String,
    pub output_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub batch_id: i64,
    pub story_id: Option<i64>,
    pub command_id: Option<i64>,
    pub timestamp: i64,
    pub event_type: String,
    pub epic_id: Option<String>,
    pub story_key: Option<String>,
    pub command: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub payload_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: i64,
    pub batch_id: i64,
    pub story_key: String,
    pub task_type: String,
    pub spawned_at: i64,
    pub completed_at: Option<i64>,
    pub status: String,
}
