//! Sled-based project store with per-document change feeds.
//!
//! Documents are stored as JSON blobs keyed by project id. Each document
//! gets a broadcast channel; every committed update sends the full
//! replaced document to all subscribers, including the originator.
//!
//! Writes to one document are serialized by a per-document lock, so
//! concurrent updates to different fields compose (read-modify-write of
//! the whole document under the lock). Same-field races resolve
//! last-write-wins with no merge.

use dashmap::DashMap;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    ChangeEvent, ProjectPatch, ProjectStore, ProjectSummary, StoreConfig, StoreError, StoreResult,
};
use crate::project::{Project, ProjectId};

const TREE_PROJECTS: &str = "projects";

/// Per-document change feed plus the write lock serializing its updates
#[derive(Clone)]
struct ProjectFeed {
    tx: broadcast::Sender<ChangeEvent>,
    write_lock: Arc<Mutex<()>>,
}

/// Sled-backed implementation of [`ProjectStore`]
#[derive(Clone)]
pub struct SledProjectStore {
    db: Arc<Db>,
    projects: Tree,
    feeds: Arc<DashMap<ProjectId, ProjectFeed>>,
    config: StoreConfig,
}

impl SledProjectStore {
    /// Open or create a store at the configured path
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let projects = db.open_tree(TREE_PROJECTS)?;

        Ok(Self {
            db: Arc::new(db),
            projects,
            feeds: Arc::new(DashMap::new()),
            config,
        })
    }

    /// Open with default configuration
    pub fn open_default() -> StoreResult<Self> {
        Self::open(StoreConfig::default())
    }

    fn feed(&self, id: &str) -> ProjectFeed {
        self.feeds
            .entry(id.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.config.feed_capacity);
                ProjectFeed {
                    tx,
                    write_lock: Arc::new(Mutex::new(())),
                }
            })
            .clone()
    }

    fn load(&self, id: &str) -> StoreResult<Project> {
        match self.projects.get(id.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn save(&self, project: &Project) -> StoreResult<()> {
        let bytes = serde_json::to_vec(project)?;
        self.projects.insert(project.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Number of stored documents
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProjectStore for SledProjectStore {
    async fn create(&self, project: &Project) -> StoreResult<()> {
        if self.projects.contains_key(project.id.as_bytes())? {
            return Err(StoreError::AlreadyExists(project.id.clone()));
        }
        self.save(project)?;
        debug!("Created project document: {}", project.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Project> {
        self.load(id)
    }

    async fn update(&self, id: &str, patch: ProjectPatch) -> StoreResult<()> {
        let feed = self.feed(id);
        let committed = {
            let _guard = feed.write_lock.lock();
            let mut project = self.load(id)?;
            patch.apply(&mut project);
            project.touch();
            self.save(&project)?;
            project
        };

        let _ = feed.tx.send(ChangeEvent::Replaced(committed));
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let feed = self.feed(id);
        {
            let _guard = feed.write_lock.lock();
            if self.projects.remove(id.as_bytes())?.is_none() {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        let _ = feed.tx.send(ChangeEvent::Removed);
        // Fresh subscriptions to the dead id get a silent channel
        self.feeds.remove(id);
        debug!("Removed project document: {}", id);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<ProjectSummary>> {
        let mut summaries = Vec::new();
        for item in self.projects.iter() {
            let (_, bytes) = item?;
            let project: Project = serde_json::from_slice(&bytes)?;
            summaries.push(ProjectSummary::from(&project));
        }
        Ok(summaries)
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<ChangeEvent> {
        self.feed(id).tx.subscribe()
    }
}

impl Drop for SledProjectStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
