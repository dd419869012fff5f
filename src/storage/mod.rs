//! Storage module for persistent project documents.
//!
//! This module defines the store adapter seam for the synchronization core:
//! - `ProjectStore`: read-one / field-level update / remove, plus a
//!   per-document change feed delivering the full replaced document
//! - `ProjectPatch`: full replacement values for the fields being changed
//! - `SledProjectStore`: embedded implementation backed by Sled
//!
//! The change feed deliberately carries whole documents, never diffs;
//! consumers must treat every event as an authoritative replacement of
//! their local copy. A merge/patch strategy could be substituted behind
//! `ProjectStore` without touching any controller call site.

mod sled_store;

pub use sled_store::SledProjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::project::{ChatMessage, Project, ProjectId, Task, TimerStatus};

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Project not found: {0}")]
    NotFound(ProjectId),

    #[error("Project already exists: {0}")]
    AlreadyExists(ProjectId),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One event on a project's change feed.
///
/// `Replaced` carries the full committed document; one event is emitted per
/// committed update, including updates originated by the subscriber itself.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Replaced(Project),
    Removed,
}

/// Field-level update: each set field carries a full replacement value.
///
/// Fields left as `None` are untouched, so concurrent updates to different
/// fields compose. Concurrent updates to the same field race and the
/// temporally-last commit wins wholesale.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub team_name: Option<String>,
    pub tasks: Option<Vec<Task>>,
    pub messages: Option<Vec<ChatMessage>>,
    /// `Some(None)` clears the countdown target
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub timer_status: Option<TimerStatus>,
    pub flowchart_data: Option<JsonValue>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_team_name(mut self, team_name: impl Into<String>) -> Self {
        self.team_name = Some(team_name.into());
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_end_time(mut self, end_time: Option<DateTime<Utc>>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_timer_status(mut self, status: TimerStatus) -> Self {
        self.timer_status = Some(status);
        self
    }

    pub fn with_flowchart(mut self, data: JsonValue) -> Self {
        self.flowchart_data = Some(data);
        self
    }

    /// True when no field is being replaced
    pub fn is_empty(&self) -> bool {
        self.team_name.is_none()
            && self.tasks.is_none()
            && self.messages.is_none()
            && self.end_time.is_none()
            && self.timer_status.is_none()
            && self.flowchart_data.is_none()
    }

    /// Blind-overwrite the set fields onto a document
    pub fn apply(&self, project: &mut Project) {
        if let Some(team_name) = &self.team_name {
            project.team_name = team_name.clone();
        }
        if let Some(tasks) = &self.tasks {
            project.tasks = tasks.clone();
        }
        if let Some(messages) = &self.messages {
            project.messages = messages.clone();
        }
        if let Some(end_time) = &self.end_time {
            project.end_time = *end_time;
        }
        if let Some(status) = self.timer_status {
            project.timer_status = status;
        }
        if let Some(data) = &self.flowchart_data {
            project.flowchart_data = Some(data.clone());
        }
    }
}

/// Lightweight listing entry for the project index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub team_name: String,
    pub task_count: usize,
    pub completed_count: usize,
    pub created_at: i64,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            team_name: project.team_name.clone(),
            task_count: project.tasks.len(),
            completed_count: project.tasks.iter().filter(|t| t.is_completed()).count(),
            created_at: project.created_at,
        }
    }
}

/// Store adapter contract for one project document per id.
///
/// Any backend offering document read/update/delete plus a per-key
/// change-notification stream satisfies this.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a new document; fails if the id is already taken
    async fn create(&self, project: &Project) -> StoreResult<()>;

    /// Single-document fetch
    async fn get(&self, id: &str) -> StoreResult<Project>;

    /// Replace the fields named by the patch; emits one change event
    async fn update(&self, id: &str, patch: ProjectPatch) -> StoreResult<()>;

    /// Delete the document; subsequent `get`/`subscribe` yield
    /// NotFound/silence
    async fn remove(&self, id: &str) -> StoreResult<()>;

    /// List all documents as summaries
    async fn list(&self) -> StoreResult<Vec<ProjectSummary>>;

    /// Subscribe to the document's change feed. Lazy and infinite; a
    /// lagged receiver skips straight to the newest committed state.
    fn subscribe(&self, id: &str) -> broadcast::Receiver<ChangeEvent>;
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Flush interval in milliseconds (0 = immediate)
    pub flush_interval_ms: u64,
    /// Buffered events per change feed before slow subscribers lag
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/warroom.sled".to_string(),
            flush_interval_ms: 500,
            feed_capacity: 256,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Priority;

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut project = Project::bootstrap("Before", "idea", 2);
        let original_tasks = project.tasks.clone();

        let patch = ProjectPatch::new().with_team_name("After");
        patch.apply(&mut project);

        assert_eq!(project.team_name, "After");
        assert_eq!(project.tasks.len(), original_tasks.len());
        assert!(project.end_time.is_some());
    }

    #[test]
    fn test_patch_clears_end_time() {
        let mut project = Project::bootstrap("Team", "idea", 2);
        assert!(project.end_time.is_some());

        let patch = ProjectPatch::new()
            .with_end_time(None)
            .with_timer_status(TimerStatus::Stopped);
        patch.apply(&mut project);

        assert!(project.end_time.is_none());
        assert_eq!(project.timer_status, TimerStatus::Stopped);
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(ProjectPatch::new().is_empty());
        assert!(!ProjectPatch::new().with_team_name("x").is_empty());
        assert!(!ProjectPatch::new().with_end_time(None).is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut project = Project::bootstrap("Team", "idea", 2);
        project.tasks[0].toggle();
        project.tasks.push(Task::new("Extra", "Member 2", Priority::Low));

        let summary = ProjectSummary::from(&project);
        assert_eq!(summary.task_count, 5);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.team_name, "Team");
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new("/tmp/test.sled")
            .with_flush_interval(0)
            .with_feed_capacity(16);

        assert_eq!(config.path, "/tmp/test.sled");
        assert_eq!(config.flush_interval_ms, 0);
        assert_eq!(config.feed_capacity, 16);
    }
}
