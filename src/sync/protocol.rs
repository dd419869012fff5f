//! JSON wire protocol for the dashboard WebSocket.
//!
//! One socket corresponds to one mounted dashboard view. Requests are the
//! view's update-translation operations; replies carry full document
//! snapshots (never diffs), countdown frames, and surfaced failures.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::project::{Priority, Project};

/// Messages sent by a dashboard client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardRequest {
    /// Flip a task between pending and completed
    ToggleTask { task_id: String },

    /// Append a pending task
    AddTask {
        task_name: String,
        assigned_to: String,
        #[serde(default)]
        priority: Priority,
    },

    /// Remove a task by id
    RemoveTask { task_id: String },

    /// Reassign a task
    AssignTask {
        task_id: String,
        assigned_to: String,
    },

    /// Replace the team name
    RenameTeam { team_name: String },

    /// Append a chat message
    PostMessage { text: String, sender: String },

    /// Start a countdown of the given length
    StartTimer { duration_hours: u32 },

    /// Flip running/paused
    ToggleTimer,

    /// Clear the countdown
    ResetTimer,

    /// Replace the diagram payload
    SaveFlowchart { data: JsonValue },
}

/// Messages pushed to a dashboard client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardReply {
    /// Full document snapshot: sent once on mount and again on every
    /// committed update observed on the change feed
    Project { project: Project },

    /// The document does not exist (initial fetch missed)
    NotFound,

    /// The derived countdown display changed
    Countdown { display: String },

    /// The document was deleted; leave the dashboard
    Removed,

    /// A user action failed; nothing is retried
    Error { message: String },
}
