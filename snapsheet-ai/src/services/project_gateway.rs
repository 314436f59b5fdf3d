//! Remote persistence gateway
//!
//! The project store: create/read/update/delete of the Project aggregate,
//! binary upload and deletion, and live per-user subscriptions.
//!
//! `SqliteProjectGateway` keeps rows in SQLite and binaries on the local
//! filesystem under the blob root. Every mutation emits
//! `SheetEvent::ProjectsChanged` for the owning user.

use crate::db::projects as db;
use crate::models::{Identity, ImageFile, Project, ProjectData, ProjectUpdate, StoredBinary};
use async_trait::async_trait;
use chrono::Utc;
use snapsheet_common::events::{EventBus, SheetEvent};
use sqlx::SqlitePool;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Root directory (under the blob root) of uploaded project images
pub const IMAGE_DIR: &str = "project-images";

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] snapsheet_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Project not found: {0}")]
    NotFound(String),
}

/// Receives the full project list on every change
pub type ProjectCallback = Box<dyn Fn(Vec<Project>) + Send + Sync>;

/// Live project-list subscription; dropping it stops delivery
pub struct ProjectSubscription {
    task: JoinHandle<()>,
}

impl ProjectSubscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn unsubscribe(self) {
        // Drop aborts the task
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ProjectSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Project store seam
#[async_trait]
pub trait ProjectGateway: Send + Sync {
    /// Create a project owned by `identity`; returns its id
    async fn create_project(
        &self,
        identity: &Identity,
        data: ProjectData,
    ) -> Result<String, GatewayError>;

    /// Partial update; always bumps `updated_at`
    async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<(), GatewayError>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, GatewayError>;

    /// Projects of `identity`, most recently updated first
    async fn list_projects(&self, identity: &Identity) -> Result<Vec<Project>, GatewayError>;

    /// Titles of `identity`'s projects
    async fn list_titles(&self, identity: &Identity) -> Result<Vec<String>, GatewayError> {
        Ok(self
            .list_projects(identity)
            .await?
            .into_iter()
            .map(|p| p.title)
            .collect())
    }

    /// Deliver the current project set now and after every change
    fn subscribe_projects(
        &self,
        identity: &Identity,
        on_change: ProjectCallback,
    ) -> ProjectSubscription;

    /// Delete a project and, best-effort, its stored binaries
    async fn delete_project(&self, project_id: &str) -> Result<(), GatewayError>;

    async fn upload_binary(
        &self,
        image: &ImageFile,
        identity: &Identity,
        project_id: &str,
        column_id: &str,
    ) -> Result<StoredBinary, GatewayError>;

    /// Best-effort; failures are logged, never returned
    async fn delete_binary(&self, storage_path: &str);
}

/// SQLite + filesystem project store
pub struct SqliteProjectGateway {
    pool: SqlitePool,
    event_bus: EventBus,
    blob_root: PathBuf,
    public_base_url: String,
    max_lock_wait_ms: u64,
}

impl SqliteProjectGateway {
    /// # Arguments
    /// * `blob_root` - Directory holding `project-images/`
    /// * `public_base_url` - URL prefix under which `blob_root` is served
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        blob_root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            pool,
            event_bus,
            blob_root: blob_root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_lock_wait_ms,
        }
    }

    pub fn blob_root(&self) -> &Path {
        &self.blob_root
    }

    fn notify(&self, user_id: &str) {
        self.event_bus.emit_lossy(SheetEvent::ProjectsChanged {
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Resolve a storage path inside the blob root, refusing escapes
    fn blob_path(&self, storage_path: &str) -> Option<PathBuf> {
        let relative = Path::new(storage_path);
        let contained = !storage_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        contained.then(|| self.blob_root.join(relative))
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_path_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// `project-images/{user}/{project}/{column}_{millis}.{ext}`
pub fn storage_path_for(
    identity: &Identity,
    project_id: &str,
    column_id: &str,
    millis: i64,
    extension: &str,
) -> String {
    format!(
        "{}/{}/{}/{}_{}.{}",
        IMAGE_DIR,
        sanitize_path_component(identity.as_str()),
        sanitize_path_component(project_id),
        sanitize_path_component(column_id),
        millis,
        sanitize_path_component(extension)
    )
}

/// True when `storage_path` lies under `user_id`'s image folder
pub fn owns_storage_path(user_id: &str, storage_path: &str) -> bool {
    let prefix = format!("{}/{}/", IMAGE_DIR, sanitize_path_component(user_id));
    storage_path.starts_with(&prefix) && !storage_path.contains("..")
}

async fn deliver(pool: &SqlitePool, user_id: &str, on_change: &ProjectCallback) {
    match db::list_projects(pool, user_id).await {
        Ok(projects) => on_change(projects),
        Err(e) => tracing::warn!(user_id, error = %e, "Project subscription refresh failed"),
    }
}

#[async_trait]
impl ProjectGateway for SqliteProjectGateway {
    async fn create_project(
        &self,
        identity: &Identity,
        data: ProjectData,
    ) -> Result<String, GatewayError> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            user_id: identity.as_str().to_string(),
            title: data.title,
            keys: data.keys,
            columns: data.columns,
            created_at: now,
            updated_at: now,
            is_public: data.is_public,
        };

        db::insert_project(&self.pool, self.max_lock_wait_ms, &project).await?;
        tracing::info!(project_id = %project.id, user_id = %identity, "Project created");

        self.notify(identity.as_str());
        Ok(project.id)
    }

    async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<(), GatewayError> {
        let found =
            db::update_project(&self.pool, self.max_lock_wait_ms, project_id, &update, Utc::now())
                .await?;
        if !found {
            return Err(GatewayError::NotFound(project_id.to_string()));
        }
        tracing::debug!(project_id, "Project updated");

        if let Some(owner) = db::project_owner(&self.pool, project_id).await? {
            self.notify(&owner);
        }
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, GatewayError> {
        Ok(db::load_project(&self.pool, project_id).await?)
    }

    async fn list_projects(&self, identity: &Identity) -> Result<Vec<Project>, GatewayError> {
        Ok(db::list_projects(&self.pool, identity.as_str()).await?)
    }

    async fn list_titles(&self, identity: &Identity) -> Result<Vec<String>, GatewayError> {
        Ok(db::list_titles(&self.pool, identity.as_str()).await?)
    }

    fn subscribe_projects(
        &self,
        identity: &Identity,
        on_change: ProjectCallback,
    ) -> ProjectSubscription {
        // Subscribe before the first listing so no change falls in between
        let mut rx = self.event_bus.subscribe();
        let pool = self.pool.clone();
        let user_id = identity.as_str().to_string();

        let task = tokio::spawn(async move {
            deliver(&pool, &user_id, &on_change).await;

            loop {
                match rx.recv().await {
                    Ok(SheetEvent::ProjectsChanged { user_id: changed, .. }) if changed == user_id => {
                        deliver(&pool, &user_id, &on_change).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(user_id = %user_id, skipped, "Project subscription lagged, refreshing");
                        deliver(&pool, &user_id, &on_change).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        ProjectSubscription::new(task)
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), GatewayError> {
        let project = db::load_project(&self.pool, project_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(project_id.to_string()))?;

        // Copies of another user's project still reference that user's binaries
        for storage_path in project.storage_paths() {
            if owns_storage_path(&project.user_id, storage_path) {
                self.delete_binary(storage_path).await;
            } else {
                tracing::debug!(project_id, storage_path, "Keeping binary owned by another user");
            }
        }

        db::delete_project(&self.pool, self.max_lock_wait_ms, project_id).await?;
        tracing::info!(project_id, "Project deleted");

        self.notify(&project.user_id);
        Ok(())
    }

    async fn upload_binary(
        &self,
        image: &ImageFile,
        identity: &Identity,
        project_id: &str,
        column_id: &str,
    ) -> Result<StoredBinary, GatewayError> {
        let storage_path = storage_path_for(
            identity,
            project_id,
            column_id,
            Utc::now().timestamp_millis(),
            &image.extension(),
        );
        let file_path = self.blob_root.join(&storage_path);

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file_path, &image.bytes[..]).await?;

        tracing::debug!(storage_path = %storage_path, bytes = image.len(), "Binary uploaded");

        Ok(StoredBinary {
            url: format!("{}/{}", self.public_base_url, storage_path),
            storage_path,
            content_type: image.content_type.clone(),
            size: image.len() as u64,
        })
    }

    async fn delete_binary(&self, storage_path: &str) {
        let Some(file_path) = self.blob_path(storage_path) else {
            tracing::warn!(storage_path, "Refusing to delete binary outside blob root");
            return;
        };

        if let Err(e) = tokio::fs::remove_file(&file_path).await {
            tracing::warn!(storage_path, error = %e, "Binary delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("user@example.com"), "user_example_com");
        assert_eq!(sanitize_path_component("../etc"), "___etc");
        assert_eq!(sanitize_path_component(""), "_");
        assert_eq!(sanitize_path_component("col_ab-12"), "col_ab-12");
    }

    #[test]
    fn test_storage_path_layout() {
        let identity = Identity::new("u/1").unwrap();
        let path = storage_path_for(&identity, "temp_abc", "col_1", 1700000000000, "png");
        assert_eq!(path, "project-images/u_1/temp_abc/col_1_1700000000000.png");
    }

    #[test]
    fn test_owns_storage_path() {
        let identity = Identity::new("u/1").unwrap();
        let path = storage_path_for(&identity, "p1", "col_1", 1, "png");
        assert!(owns_storage_path("u/1", &path));
        assert!(owns_storage_path("u_1", &path));
        assert!(!owns_storage_path("u", &path));
        assert!(!owns_storage_path("u_2", &path));
        assert!(!owns_storage_path("u_1", "project-images/u_1/../u_2/p1/a.png"));
        assert!(!owns_storage_path("u_1", "elsewhere/u_1/p1/a.png"));
    }
}
