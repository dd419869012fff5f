//! Project document model.
//!
//! One `Project` is the single mutable aggregate for a team's workspace:
//! task board, chat log, countdown-timer fields, and the architecture
//! diagram payload. Every field is replaced in full on update; there are no
//! partial/patch semantics below the field level.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Unique identifier for a project document
pub type ProjectId = String;

/// Unique identifier for a task within a project
pub type TaskId = String;

/// Default countdown length applied by the setup flow
pub const DEFAULT_DURATION_HOURS: i64 = 24;

/// Shared countdown state persisted on the project document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    /// No countdown is active
    Stopped,
    /// Counting down toward `end_time`
    Running,
    /// Frozen; `end_time` is left untouched while paused
    Paused,
}

impl Default for TimerStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Completion state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// Task priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A single task on the board.
///
/// Tasks carry a stable id assigned at creation so concurrent edits and
/// deletes from different clients cannot target the wrong row after the
/// list is reordered underneath them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, assigned once at creation
    #[serde(default = "generate_id")]
    pub id: TaskId,
    pub task_name: String,
    pub assigned_to: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
}

impl Task {
    pub fn new(
        task_name: impl Into<String>,
        assigned_to: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: generate_id(),
            task_name: task_name.into(),
            assigned_to: assigned_to.into(),
            status: TaskStatus::Pending,
            priority,
        }
    }

    /// Flip between pending and completed
    pub fn toggle(&mut self) {
        self.status = match self.status {
            TaskStatus::Pending => TaskStatus::Completed,
            TaskStatus::Completed => TaskStatus::Pending,
        };
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// A chat message in the team feed.
///
/// `time` is a display string, not a sortable timestamp; ordering is the
/// position in the `messages` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Collision-resistant id, generated client-side
    #[serde(default = "generate_id")]
    pub id: String,
    pub text: String,
    pub sender: String,
    pub time: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            text: text.into(),
            sender: sender.into(),
            time: Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// The project document: one per team, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Opaque identifier, immutable after creation; routing key for both
    /// storage lookups and change-feed scoping
    pub id: ProjectId,
    pub team_name: String,
    #[serde(default)]
    pub idea: String,
    #[serde(default = "default_strength")]
    pub team_strength: u32,
    /// Insertion order is display order
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Append-only in practice, though updates replace the whole sequence
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Absolute countdown target; absent means no timer has been started
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timer_status: TimerStatus,
    /// Diagram payload `{nodes, edges}`, opaque to the sync core.
    /// Accepts the legacy `flow_data` column name on read.
    #[serde(default, alias = "flow_data")]
    pub flowchart_data: Option<JsonValue>,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of last committed update
    pub updated_at: i64,
}

impl Project {
    /// Create a fresh project the way the setup flow does: the fixed
    /// four-item task template split across the team, and a running
    /// 24-hour countdown.
    pub fn bootstrap(
        team_name: impl Into<String>,
        idea: impl Into<String>,
        team_strength: u32,
    ) -> Self {
        let strength = team_strength.max(1);
        let closer = format!("Member {}", strength);

        let tasks = vec![
            Task::new("Core Architecture & Database", "Member 1", Priority::High),
            Task::new("Frontend UI & Styling", "Member 2", Priority::High),
            Task::new("Real-time Sync & Timer", "Member 1", Priority::Medium),
            Task::new("Final Demo Preparation", closer, Priority::Low),
        ];

        let now = Utc::now();
        Self {
            id: generate_id(),
            team_name: team_name.into(),
            idea: idea.into(),
            team_strength: strength,
            tasks,
            messages: Vec::new(),
            end_time: Some(now + chrono::Duration::hours(DEFAULT_DURATION_HOURS)),
            timer_status: TimerStatus::Running,
            flowchart_data: None,
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
        }
    }

    /// Look up a task by its stable id
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Completion percentage across the task list, rounded to the nearest
    /// whole percent; an empty list counts as 0.
    pub fn progress_percent(&self) -> u32 {
        if self.tasks.is_empty() {
            return 0;
        }
        let completed = self.tasks.iter().filter(|t| t.is_completed()).count();
        ((completed as f64 / self.tasks.len() as f64) * 100.0).round() as u32
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_strength() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_template() {
        let project = Project::bootstrap("Code Warriors", "AI judge", 3);

        assert_eq!(project.team_name, "Code Warriors");
        assert_eq!(project.tasks.len(), 4);
        assert!(project.tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(project.tasks[3].assigned_to, "Member 3");
        assert_eq!(project.timer_status, TimerStatus::Running);

        let end = project.end_time.expect("bootstrap sets a countdown");
        let expected = Utc::now() + chrono::Duration::hours(DEFAULT_DURATION_HOURS);
        assert!((end - expected).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_bootstrap_clamps_strength() {
        let project = Project::bootstrap("Solo", "one-person band", 0);
        assert_eq!(project.team_strength, 1);
        assert_eq!(project.tasks[3].assigned_to, "Member 1");
    }

    #[test]
    fn test_task_toggle_round_trip() {
        let mut task = Task::new("Write docs", "Ava", Priority::Low);
        assert_eq!(task.status, TaskStatus::Pending);

        task.toggle();
        assert_eq!(task.status, TaskStatus::Completed);

        task.toggle();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_progress_percent() {
        let mut project = Project::bootstrap("Team", "idea", 2);
        assert_eq!(project.progress_percent(), 0);

        project.tasks[0].toggle();
        assert_eq!(project.progress_percent(), 25);

        for task in &mut project.tasks {
            task.status = TaskStatus::Completed;
        }
        assert_eq!(project.progress_percent(), 100);

        project.tasks.clear();
        assert_eq!(project.progress_percent(), 0);
    }

    #[test]
    fn test_chat_message_ids_distinct() {
        let a = ChatMessage::new("hello", "Ava");
        let b = ChatMessage::new("hello", "Ava");
        assert_ne!(a.id, b.id);
        assert_eq!(a.text, "hello");
        assert_eq!(a.sender, "Ava");
    }

    #[test]
    fn test_timer_status_wire_format() {
        let json = serde_json::to_string(&TimerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let parsed: TimerStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, TimerStatus::Paused);
    }

    #[test]
    fn test_legacy_flow_data_alias() {
        let raw = serde_json::json!({
            "id": "p-1",
            "team_name": "Legacy",
            "flow_data": { "nodes": [], "edges": [] },
            "created_at": 0,
            "updated_at": 0,
        });

        let project: Project = serde_json::from_value(raw).unwrap();
        assert!(project.flowchart_data.is_some());
        assert_eq!(project.timer_status, TimerStatus::Stopped);
        assert!(project.end_time.is_none());
    }
}
