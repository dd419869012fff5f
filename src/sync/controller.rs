//! Client synchronization controller for one open dashboard view.
//!
//! Each controller holds one in-memory copy of the project document:
//! - on open, an initial fetch decides `Found` vs `NotFound`
//! - for the life of the view, a feed task consumes the store's change
//!   feed and replaces the local copy wholesale on every event
//! - user actions mutate the local copy optimistically, then push a
//!   field-level update to the store; a failed write leaves the local
//!   copy inconsistent until the next successful feed event
//! - a ticker derives the countdown display once per second
//!
//! The feed task and the ticker are the only long-lived resources; both
//! are released on `close()` and on drop.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::timer::{Countdown, TICK_INTERVAL};
use super::{SyncError, SyncResult};
use crate::project::{ChatMessage, Priority, Project, ProjectId, Task, TimerStatus};
use crate::storage::{ChangeEvent, ProjectPatch, ProjectStore, StoreError};

/// Lifecycle of one dashboard view
#[derive(Debug, Clone)]
pub enum ViewState {
    /// Initial fetch in flight
    Loading,
    /// Document loaded; holds the local copy
    Found(Project),
    /// Document absent, or the initial fetch failed
    NotFound,
    /// View unmounted; all resources released
    Closed,
}

impl ViewState {
    pub fn is_found(&self) -> bool {
        matches!(self, ViewState::Found(_))
    }

    pub fn project(&self) -> Option<&Project> {
        match self {
            ViewState::Found(project) => Some(project),
            _ => None,
        }
    }
}

/// Events pushed to the owner of the view (one socket, or a test)
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The local copy was replaced by a committed document
    Replaced(Project),
    /// The document was deleted; the view should leave the dashboard
    Removed,
    /// The derived countdown display changed
    Countdown(String),
}

/// State shared between the controller, its feed task, and its ticker
struct ViewShared {
    project_id: ProjectId,
    state: RwLock<ViewState>,
    countdown: Mutex<Countdown>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ViewShared {
    /// Snapshot of the timer fields, if a document is loaded
    fn timer_fields(&self) -> Option<(Option<DateTime<Utc>>, TimerStatus)> {
        match &*self.state.read() {
            ViewState::Found(project) => Some((project.end_time, project.timer_status)),
            _ => None,
        }
    }

    /// Wholesale replacement of the local copy. Returns true when the
    /// timer fields changed identity, which requires a ticker restart.
    fn replace(&self, project: Project) -> bool {
        let mut state = self.state.write();
        let timer_changed = match &*state {
            ViewState::Found(old) => {
                old.end_time != project.end_time || old.timer_status != project.timer_status
            }
            _ => true,
        };
        *state = ViewState::Found(project);
        timer_changed
    }

    /// Cancel any running ticker and start a fresh one. The countdown
    /// value survives restarts so a paused display stays frozen.
    fn restart_ticker(self: Arc<Self>) {
        self.stop_ticker();

        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;

                let Some((end_time, status)) = shared.timer_fields() else {
                    break;
                };

                let changed = {
                    let mut countdown = shared.countdown.lock();
                    let before = countdown.display().to_string();
                    let after = countdown.tick(end_time, status, Utc::now()).to_string();
                    (after != before).then_some(after)
                };

                if let Some(display) = changed {
                    if shared.events_tx.send(ViewEvent::Countdown(display)).is_err() {
                        break;
                    }
                }
            }
        });

        *self.ticker.lock() = Some(handle);
    }

    fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}

/// Controller for one open dashboard view
pub struct DashboardController {
    store: Arc<dyn ProjectStore>,
    shared: Arc<ViewShared>,
    shutdown_tx: broadcast::Sender<()>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl DashboardController {
    /// Mount a view: initial fetch, then subscribe for its lifetime.
    ///
    /// Any failure of the initial fetch lands in `NotFound`; the view
    /// only consumes the change feed when the document was found.
    pub async fn open(
        store: Arc<dyn ProjectStore>,
        project_id: impl Into<ProjectId>,
    ) -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let project_id = project_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(ViewShared {
            project_id: project_id.clone(),
            state: RwLock::new(ViewState::Loading),
            countdown: Mutex::new(Countdown::new()),
            events_tx,
            ticker: Mutex::new(None),
        });

        let controller = Self {
            store,
            shared: shared.clone(),
            shutdown_tx,
            feed: Mutex::new(None),
        };

        match controller.store.get(&project_id).await {
            Ok(project) => {
                *shared.state.write() = ViewState::Found(project);
                shared.clone().restart_ticker();
                let handle = controller.spawn_feed();
                *controller.feed.lock() = Some(handle);
            }
            Err(e) => {
                debug!("Initial fetch failed for {}: {}", project_id, e);
                *shared.state.write() = ViewState::NotFound;
            }
        }

        (controller, events_rx)
    }

    pub fn project_id(&self) -> &str {
        &self.shared.project_id
    }

    /// Clone of the current view state (and local copy, if any)
    pub fn snapshot(&self) -> ViewState {
        self.shared.state.read().clone()
    }

    /// Consume the change feed until shutdown, removal, or feed loss.
    ///
    /// A lagged receiver skips to the newest committed state; a closed
    /// feed leaves the stale local copy in place.
    fn spawn_feed(&self) -> JoinHandle<()> {
        let mut rx = self.store.subscribe(&self.shared.project_id);
        let mut shutdown = self.shutdown_tx.subscribe();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(ChangeEvent::Replaced(project)) => {
                            let timer_changed = shared.replace(project.clone());
                            if timer_changed {
                                shared.clone().restart_ticker();
                            }
                            if shared.events_tx.send(ViewEvent::Replaced(project)).is_err() {
                                break;
                            }
                        }
                        Ok(ChangeEvent::Removed) => {
                            *shared.state.write() = ViewState::NotFound;
                            shared.stop_ticker();
                            let _ = shared.events_tx.send(ViewEvent::Removed);
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                "Change feed for {} lagged, skipped {} events",
                                shared.project_id, skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Change feed closed for {}", shared.project_id);
                            break;
                        }
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Run a mutation against the local copy; errors when no document is
    /// loaded (Loading, NotFound, or Closed).
    fn with_project<T>(&self, f: impl FnOnce(&mut Project) -> SyncResult<T>) -> SyncResult<T> {
        let mut state = self.shared.state.write();
        match &mut *state {
            ViewState::Found(project) => f(project),
            _ => Err(SyncError::NoDocument),
        }
    }

    async fn commit(&self, patch: ProjectPatch) -> SyncResult<()> {
        match self.store.update(&self.shared.project_id, patch).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(id)) => Err(SyncError::NotFound(id)),
            Err(e) => Err(SyncError::Write(e)),
        }
    }

    // ------------------------------------------------------------------
    // Update translation: each op replaces exactly one document field
    // ------------------------------------------------------------------

    /// Flip a task between pending and completed
    pub async fn toggle_task(&self, task_id: &str) -> SyncResult<()> {
        let tasks = self.with_project(|project| {
            let task = project
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| SyncError::TaskNotFound(task_id.to_string()))?;
            task.toggle();
            Ok(project.tasks.clone())
        })?;
        self.commit(ProjectPatch::new().with_tasks(tasks)).await
    }

    /// Append a pending task to the board
    pub async fn add_task(
        &self,
        task_name: impl Into<String>,
        assigned_to: impl Into<String>,
        priority: Priority,
    ) -> SyncResult<()> {
        let task = Task::new(task_name, assigned_to, priority);
        let tasks = self.with_project(|project| {
            project.tasks.push(task.clone());
            Ok(project.tasks.clone())
        })?;
        self.commit(ProjectPatch::new().with_tasks(tasks)).await
    }

    /// Remove a task by its stable id
    pub async fn remove_task(&self, task_id: &str) -> SyncResult<()> {
        let tasks = self.with_project(|project| {
            let before = project.tasks.len();
            project.tasks.retain(|t| t.id != task_id);
            if project.tasks.len() == before {
                return Err(SyncError::TaskNotFound(task_id.to_string()));
            }
            Ok(project.tasks.clone())
        })?;
        self.commit(ProjectPatch::new().with_tasks(tasks)).await
    }

    /// Reassign a task to another member
    pub async fn assign_task(
        &self,
        task_id: &str,
        assigned_to: impl Into<String>,
    ) -> SyncResult<()> {
        let assigned_to = assigned_to.into();
        let tasks = self.with_project(|project| {
            let task = project
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| SyncError::TaskNotFound(task_id.to_string()))?;
            task.assigned_to = assigned_to;
            Ok(project.tasks.clone())
        })?;
        self.commit(ProjectPatch::new().with_tasks(tasks)).await
    }

    /// Replace the team name
    pub async fn rename_team(&self, team_name: impl Into<String>) -> SyncResult<()> {
        let team_name = team_name.into();
        self.with_project(|project| {
            project.team_name = team_name.clone();
            Ok(())
        })?;
        self.commit(ProjectPatch::new().with_team_name(team_name))
            .await
    }

    /// Append a chat message with a freshly generated id
    pub async fn post_message(
        &self,
        text: impl Into<String>,
        sender: impl Into<String>,
    ) -> SyncResult<()> {
        let message = ChatMessage::new(text, sender);
        let messages = self.with_project(|project| {
            project.messages.push(message.clone());
            Ok(project.messages.clone())
        })?;
        self.commit(ProjectPatch::new().with_messages(messages))
            .await
    }

    /// Start a countdown of `duration_hours` from now
    pub async fn start_timer(&self, duration_hours: u32) -> SyncResult<()> {
        if duration_hours == 0 {
            return Err(SyncError::InvalidDuration);
        }
        let end_time = Utc::now() + chrono::Duration::hours(i64::from(duration_hours));
        self.with_project(|project| {
            project.end_time = Some(end_time);
            project.timer_status = TimerStatus::Running;
            Ok(())
        })?;
        self.commit(
            ProjectPatch::new()
                .with_end_time(Some(end_time))
                .with_timer_status(TimerStatus::Running),
        )
        .await
    }

    /// Flip running/paused. `end_time` is never recomputed here, so time
    /// spent paused shortens the effective remaining time on resume.
    /// No-op while no countdown target is set.
    pub async fn toggle_timer(&self) -> SyncResult<()> {
        let new_status = {
            let mut state = self.shared.state.write();
            let project = match &mut *state {
                ViewState::Found(project) => project,
                _ => return Err(SyncError::NoDocument),
            };
            if project.end_time.is_none() {
                return Ok(());
            }
            let next = if project.timer_status == TimerStatus::Running {
                TimerStatus::Paused
            } else {
                TimerStatus::Running
            };
            project.timer_status = next;
            next
        };
        self.commit(ProjectPatch::new().with_timer_status(new_status))
            .await
    }

    /// Clear the countdown target. Idempotent.
    pub async fn reset_timer(&self) -> SyncResult<()> {
        self.with_project(|project| {
            project.end_time = None;
            project.timer_status = TimerStatus::Stopped;
            Ok(())
        })?;
        self.commit(
            ProjectPatch::new()
                .with_end_time(None)
                .with_timer_status(TimerStatus::Stopped),
        )
        .await
    }

    /// Replace the diagram payload
    pub async fn save_flowchart(&self, data: JsonValue) -> SyncResult<()> {
        self.with_project(|project| {
            project.flowchart_data = Some(data.clone());
            Ok(())
        })?;
        self.commit(ProjectPatch::new().with_flowchart(data)).await
    }

    /// Unmount the view: releases the subscription and the ticker.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.feed.lock().take() {
            handle.abort();
        }
        self.shared.stop_ticker();
        *self.shared.state.write() = ViewState::Closed;
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SledProjectStore, StoreConfig};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    async fn test_setup() -> (Arc<dyn ProjectStore>, Project, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("test.sled").to_string_lossy().to_string())
            .with_flush_interval(0);
        let store: Arc<dyn ProjectStore> = Arc::new(SledProjectStore::open(config).unwrap());

        let project = Project::bootstrap("Code Warriors", "AI judge", 2);
        store.create(&project).await.unwrap();
        (store, project, dir)
    }

    async fn next_replaced(rx: &mut mpsc::UnboundedReceiver<ViewEvent>) -> Project {
        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ViewEvent::Replaced(project))) => return project,
                Ok(Some(_)) => continue,
                other => panic!("Expected Replaced event, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_open_found() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store, project.id.clone()).await;

        let snapshot = controller.snapshot();
        assert!(snapshot.is_found());
        assert_eq!(snapshot.project().unwrap().team_name, "Code Warriors");
    }

    #[tokio::test]
    async fn test_open_not_found() {
        let (store, _project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store, "missing").await;

        assert!(matches!(controller.snapshot(), ViewState::NotFound));

        let result = controller.rename_team("nope").await;
        assert!(matches!(result, Err(SyncError::NoDocument)));
    }

    #[tokio::test]
    async fn test_toggle_task_round_trip() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;
        let task_id = project.tasks[0].id.clone();

        controller.toggle_task(&task_id).await.unwrap();
        let loaded = store.get(&project.id).await.unwrap();
        assert!(loaded.task(&task_id).unwrap().is_completed());

        controller.toggle_task(&task_id).await.unwrap();
        let loaded = store.get(&project.id).await.unwrap();
        let task = loaded.task(&task_id).unwrap();
        assert!(!task.is_completed());
        assert_eq!(task.task_name, project.tasks[0].task_name);
        assert_eq!(task.assigned_to, project.tasks[0].assigned_to);
        assert_eq!(loaded.team_name, project.team_name);
    }

    #[tokio::test]
    async fn test_toggle_unknown_task() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store, project.id.clone()).await;

        let result = controller.toggle_task("no-such-task").await;
        assert!(matches!(result, Err(SyncError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_and_remove_task() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller
            .add_task("Ship it", "Member 2", Priority::High)
            .await
            .unwrap();
        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.tasks.len(), 5);
        let added = loaded.tasks.last().unwrap();
        assert_eq!(added.task_name, "Ship it");
        assert_eq!(added.status, crate::project::TaskStatus::Pending);

        controller.remove_task(&added.id.clone()).await.unwrap();
        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.tasks.len(), 4);

        let result = controller.remove_task("already-gone").await;
        assert!(matches!(result, Err(SyncError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_assign_task() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;
        let task_id = project.tasks[0].id.clone();

        controller.assign_task(&task_id, "Ava").await.unwrap();
        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.task(&task_id).unwrap().assigned_to, "Ava");
    }

    #[tokio::test]
    async fn test_rename_reaches_other_view() {
        let (store, project, _dir) = test_setup().await;
        let (controller_a, _rx_a) =
            DashboardController::open(store.clone(), project.id.clone()).await;
        let (controller_b, mut rx_b) =
            DashboardController::open(store.clone(), project.id.clone()).await;

        controller_a.rename_team("Night Shift").await.unwrap();

        let replaced = next_replaced(&mut rx_b).await;
        assert_eq!(replaced.team_name, "Night Shift");
        assert_eq!(
            controller_b.snapshot().project().unwrap().team_name,
            "Night Shift"
        );
    }

    #[tokio::test]
    async fn test_post_message_appends_with_fresh_id() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller.post_message("hello", "Ava").await.unwrap();
        controller.post_message("hello again", "Ava").await.unwrap();

        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].text, "hello");
        assert_eq!(loaded.messages[0].sender, "Ava");
        assert_ne!(loaded.messages[0].id, loaded.messages[1].id);
    }

    #[tokio::test]
    async fn test_start_timer_sets_target() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller.start_timer(6).await.unwrap();

        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.timer_status, TimerStatus::Running);
        let expected = Utc::now() + chrono::Duration::hours(6);
        let end = loaded.end_time.unwrap();
        assert!((end - expected).num_seconds().abs() <= 1);

        let result = controller.start_timer(0).await;
        assert!(matches!(result, Err(SyncError::InvalidDuration)));
    }

    #[tokio::test]
    async fn test_toggle_timer_preserves_end_time() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller.start_timer(6).await.unwrap();
        let before = store.get(&project.id).await.unwrap();

        controller.toggle_timer().await.unwrap();
        let paused = store.get(&project.id).await.unwrap();
        assert_eq!(paused.timer_status, TimerStatus::Paused);
        assert_eq!(paused.end_time, before.end_time);

        controller.toggle_timer().await.unwrap();
        let resumed = store.get(&project.id).await.unwrap();
        assert_eq!(resumed.timer_status, TimerStatus::Running);
        assert_eq!(resumed.end_time, before.end_time);
    }

    #[tokio::test]
    async fn test_toggle_timer_noop_without_target() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller.reset_timer().await.unwrap();
        controller.toggle_timer().await.unwrap();

        let loaded = store.get(&project.id).await.unwrap();
        assert!(loaded.end_time.is_none());
        assert_eq!(loaded.timer_status, TimerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_reset_timer_idempotent() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        controller.reset_timer().await.unwrap();
        let first = store.get(&project.id).await.unwrap();
        assert!(first.end_time.is_none());
        assert_eq!(first.timer_status, TimerStatus::Stopped);

        controller.reset_timer().await.unwrap();
        let second = store.get(&project.id).await.unwrap();
        assert!(second.end_time.is_none());
        assert_eq!(second.timer_status, TimerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_save_flowchart() {
        let (store, project, _dir) = test_setup().await;
        let (controller, _rx) = DashboardController::open(store.clone(), project.id.clone()).await;

        let diagram = serde_json::json!({
            "nodes": [{ "id": "1", "data": { "label": "API" } }],
            "edges": [],
        });
        controller.save_flowchart(diagram.clone()).await.unwrap();

        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.flowchart_data, Some(diagram));
    }

    #[tokio::test]
    async fn test_countdown_events_emitted() {
        let (store, project, _dir) = test_setup().await;
        let (_controller, mut rx) =
            DashboardController::open(store.clone(), project.id.clone()).await;

        // Bootstrap starts a running 24h countdown, so the first ticker
        // pass must move the display off zero.
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ViewEvent::Countdown(display))) => {
                assert_ne!(display, crate::sync::timer::ZERO_DISPLAY);
            }
            other => panic!("Expected Countdown event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_removal_reaches_views() {
        let (store, project, _dir) = test_setup().await;
        let (controller, mut rx) =
            DashboardController::open(store.clone(), project.id.clone()).await;

        store.remove(&project.id).await.unwrap();

        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ViewEvent::Removed)) => break,
                Ok(Some(_)) => continue,
                other => panic!("Expected Removed event, got {:?}", other),
            }
        }
        assert!(matches!(controller.snapshot(), ViewState::NotFound));
    }

    #[tokio::test]
    async fn test_close_releases_feed() {
        let (store, project, _dir) = test_setup().await;
        let (controller_a, mut rx_a) =
            DashboardController::open(store.clone(), project.id.clone()).await;
        let (controller_b, _rx_b) =
            DashboardController::open(store.clone(), project.id.clone()).await;

        controller_a.close();
        assert!(matches!(controller_a.snapshot(), ViewState::Closed));

        // Drain anything queued before the close, then verify no further
        // events arrive for updates made after it.
        while rx_a.try_recv().is_ok() {}
        controller_b.rename_team("After Close").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx_a.try_recv().is_err());

        let result = controller_a.rename_team("too late").await;
        assert!(matches!(result, Err(SyncError::NoDocument)));
    }

    #[tokio::test]
    async fn test_concurrent_views_different_fields() {
        let (store, project, _dir) = test_setup().await;
        let (controller_a, _rx_a) =
            DashboardController::open(store.clone(), project.id.clone()).await;
        let (controller_b, _rx_b) =
            DashboardController::open(store.clone(), project.id.clone()).await;
        let removed_id = project.tasks[1].id.clone();

        let (a, b) = tokio::join!(
            controller_a.remove_task(&removed_id),
            controller_b.rename_team("Both Land"),
        );
        a.unwrap();
        b.unwrap();

        let loaded = store.get(&project.id).await.unwrap();
        assert_eq!(loaded.team_name, "Both Land");
        assert_eq!(loaded.tasks.len(), 3);
        assert!(loaded.tasks.iter().all(|t| t.id != removed_id));
    }
}
