//! Active-project session state.
//!
//! Replaces ambient browser-local storage with an explicit object that is
//! injected where needed: loaded from disk once at startup, persisted when
//! a project becomes active, and cleared when the hackathon is finished.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::project::ProjectId;

/// Errors that can occur persisting session state
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionState {
    active_project_id: Option<ProjectId>,
}

/// The active-project session, persisted as a small JSON file
pub struct Session {
    path: PathBuf,
    state: RwLock<SessionState>,
}

impl Session {
    /// Load session state from disk. A missing file means no active
    /// project; an unreadable file is treated the same, with a warning,
    /// rather than refusing to start.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding unreadable session file {:?}: {}", path, e);
                    SessionState::default()
                }
            },
            Err(_) => SessionState::default(),
        };

        Self {
            path,
            state: RwLock::new(state),
        }
    }

    /// The project id recorded as active, if any
    pub fn active_project(&self) -> Option<ProjectId> {
        self.state.read().active_project_id.clone()
    }

    /// Record a project as active and persist
    pub fn set_active(&self, project_id: impl Into<ProjectId>) -> SessionResult<()> {
        self.state.write().active_project_id = Some(project_id.into());
        self.persist()
    }

    /// Forget the active project and remove the persisted state
    pub fn clear(&self) -> SessionResult<()> {
        self.state.write().active_project_id = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Clear only when the given project is the active one. Returns
    /// whether anything was cleared.
    pub fn clear_if(&self, project_id: &str) -> SessionResult<bool> {
        let matches = self.state.read().active_project_id.as_deref() == Some(project_id);
        if matches {
            self.clear()?;
        }
        Ok(matches)
    }

    fn persist(&self) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&*self.state.read())?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
