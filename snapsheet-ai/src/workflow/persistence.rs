//! Saving, loading and column deletion
//!
//! Saves are write-behind: the in-memory sheet stays authoritative and a
//! failed save leaves it untouched. Saves within a session are serialized
//! so the first one creates the project and every later one updates it.

use super::session::SheetSession;
use super::PipelineError;
use crate::models::image::guess_content_type;
use crate::models::{
    Column, Identity, ProcessingStep, Project, ProjectColumn, ProjectData, ProjectUpdate,
    Sheet,
};
use crate::services::project_gateway::owns_storage_path;
use chrono::Utc;
use snapsheet_common::events::{SheetChange, SheetEvent};

impl SheetSession {
    /// Persist the sheet for `identity`; returns the project id
    ///
    /// Local binaries without a stored copy are uploaded first. A failed
    /// upload keeps the local URL and an empty storage path.
    pub async fn save_project(&self, identity: &Identity) -> Result<String, PipelineError> {
        let _serialized = self.inner.save_lock.lock().await;

        let (generation, sheet) = {
            let mut state = self.state();
            state.status.is_saving = true;
            (state.generation, state.model.sheet().clone())
        };

        let result = self.save_sheet(identity, generation, &sheet).await;

        {
            let mut state = self.state();
            state.status.is_saving = false;
            if result.is_ok() && state.generation == generation {
                state.status.last_saved = Some(Utc::now());
            }
        }

        match &result {
            Ok((project_id, created)) => {
                tracing::info!(
                    session_id = %self.id(),
                    project_id = %project_id,
                    created,
                    "Project saved"
                );
                self.inner.event_bus.emit_lossy(SheetEvent::ProjectSaved {
                    session_id: self.id(),
                    project_id: project_id.clone(),
                    created: *created,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                self.inner.event_bus.emit_lossy(SheetEvent::ProjectSaveFailed {
                    session_id: self.id(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        result.map(|(project_id, _)| project_id)
    }

    async fn save_sheet(
        &self,
        identity: &Identity,
        generation: u64,
        sheet: &Sheet,
    ) -> Result<(String, bool), PipelineError> {
        let target = match &sheet.current_project_id {
            Some(project_id) => self.update_target(project_id, identity).await?,
            None => None,
        };
        let storage_project_id = target
            .clone()
            .unwrap_or_else(|| self.inner.temp_project_id.clone());

        let mut columns = Vec::with_capacity(sheet.columns.len());
        for column in &sheet.columns {
            if let Some(persisted) = self
                .persisted_column(column, identity, &storage_project_id, generation)
                .await
            {
                columns.push(persisted);
            }
        }

        let data = ProjectData {
            title: sheet.title.clone(),
            keys: sheet.keys.clone(),
            columns,
            is_public: false,
        };

        match target {
            Some(project_id) => {
                // Sharing is set outside the editor; saves leave it alone
                let update = ProjectUpdate {
                    is_public: None,
                    ..ProjectUpdate::from(data)
                };
                self.inner.gateway.update_project(&project_id, update).await?;
                Ok((project_id, false))
            }
            None => {
                let project_id = self.inner.gateway.create_project(identity, data).await?;
                self.with_current(generation, |state| {
                    state.model.set_current_project_id(project_id.clone());
                });
                Ok((project_id, true))
            }
        }
    }

    /// Project a save may update, or None to save a copy owned by `identity`
    ///
    /// A missing project is still targeted so the update reports it.
    async fn update_target(
        &self,
        project_id: &str,
        identity: &Identity,
    ) -> Result<Option<String>, PipelineError> {
        match self.inner.gateway.get_project(project_id).await? {
            Some(project) if project.user_id != identity.as_str() => {
                tracing::info!(
                    session_id = %self.id(),
                    project_id,
                    user_id = %identity,
                    "Project belongs to another user, saving a copy"
                );
                Ok(None)
            }
            _ => Ok(Some(project_id.to_string())),
        }
    }

    /// Persisted form of a column, uploading its binary when needed
    ///
    /// None when the column was deleted while its binary was uploading.
    async fn persisted_column(
        &self,
        column: &Column,
        identity: &Identity,
        storage_project_id: &str,
        generation: u64,
    ) -> Option<ProjectColumn> {
        let local_image = if column.is_locally_owned() {
            self.state().model.resources().resolve(&column.file_url)
        } else {
            None
        };

        let (file_type, file_size) = match (&local_image, &column.stored) {
            (Some(image), _) => (image.content_type.clone(), image.len() as u64),
            (None, Some(stored)) if !stored.content_type.is_empty() => {
                (stored.content_type.clone(), stored.size)
            }
            _ => (guess_content_type(&column.file_name).to_string(), 0),
        };

        let mut image_url = column.file_url.clone();
        let mut storage_path = None;

        if let Some(stored) = &column.stored {
            image_url = stored.url.clone();
            storage_path = Some(stored.storage_path.clone());
        } else if let Some(image) = &local_image {
            match self
                .inner
                .gateway
                .upload_binary(image, identity, storage_project_id, &column.id)
                .await
            {
                Ok(stored) => {
                    let recorded = self.with_current(generation, |state| {
                        state.model.record_stored_binary(&column.id, stored.clone())
                    });
                    if recorded == Some(false) {
                        tracing::info!(
                            session_id = %self.id(),
                            column_id = %column.id,
                            "Column deleted during upload, removing binary"
                        );
                        self.inner.gateway.delete_binary(&stored.storage_path).await;
                        return None;
                    }
                    image_url = stored.url;
                    storage_path = Some(stored.storage_path);
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %self.id(),
                        column_id = %column.id,
                        error = %e,
                        "Image upload failed, keeping local URL"
                    );
                }
            }
        } else if column.is_locally_owned() {
            tracing::warn!(column_id = %column.id, "Local image no longer available for upload");
        }

        Some(ProjectColumn {
            id: column.id.clone(),
            file_name: column.file_name.clone(),
            file_type,
            file_size,
            image_url,
            storage_path,
            values: column.values.clone(),
            uploaded_at: Utc::now(),
        })
    }

    /// Remove a column, its stored binary (best-effort), then persist
    pub async fn delete_column(
        &self,
        column_id: &str,
        identity: Option<&Identity>,
    ) -> Result<(), PipelineError> {
        let (removed, current_project_id) = {
            let mut state = self.state();
            let removed = state
                .model
                .remove_column(column_id)
                .ok_or_else(|| PipelineError::NotFound(format!("column {}", column_id)))?;
            self.emit_change(SheetChange::ColumnRemoved {
                column_id: column_id.to_string(),
            });
            (removed, state.model.sheet().current_project_id.clone())
        };

        tracing::info!(session_id = %self.id(), column_id, "Column deleted");

        let Some(identity) = identity else {
            return Ok(());
        };

        // A cached copy may predate the project (temp_ prefix) or outlive a failed create
        let storage_path = match (removed.stored, current_project_id) {
            (Some(stored), _) => Some(stored.storage_path),
            (None, Some(project_id)) => match self.inner.gateway.get_project(&project_id).await {
                Ok(project) => project
                    .filter(|p| p.user_id == identity.as_str())
                    .and_then(|p| p.columns.into_iter().find(|c| c.id == column_id))
                    .and_then(|c| c.storage_path)
                    .filter(|p| !p.is_empty()),
                Err(e) => {
                    tracing::warn!(project_id = %project_id, error = %e, "Could not look up stored image");
                    None
                }
            },
            (None, None) => None,
        };

        match storage_path {
            Some(path) if owns_storage_path(identity.as_str(), &path) => {
                self.inner.gateway.delete_binary(&path).await;
            }
            Some(path) => {
                tracing::debug!(storage_path = %path, "Keeping binary owned by another user");
            }
            None => {}
        }

        if let Err(e) = self.save_project(identity).await {
            tracing::warn!(session_id = %self.id(), error = %e, "Save failed after column deletion");
        }
        Ok(())
    }

    /// Project `identity` may read; another user's private project reads as missing
    async fn readable_project(
        &self,
        project_id: &str,
        identity: Option<&Identity>,
    ) -> Result<Project, PipelineError> {
        self.inner
            .gateway
            .get_project(project_id)
            .await?
            .filter(|project| project.readable_by(identity))
            .ok_or_else(|| PipelineError::NotFound(format!("project {}", project_id)))
    }

    /// Replace the sheet with a persisted project
    ///
    /// A missing or unreadable project leaves the current sheet untouched.
    pub async fn load_project(
        &self,
        project_id: &str,
        identity: Option<&Identity>,
    ) -> Result<(), PipelineError> {
        let project = self.readable_project(project_id, identity).await?;

        let title = project.title.clone();
        let mut state = self.state();
        state.generation += 1;
        state.model.replace_with(project.into_sheet());
        state.status.in_flight = 0;
        self.set_step(&mut state, ProcessingStep::Complete);
        self.emit_change(SheetChange::Loaded {
            project_id: project_id.to_string(),
        });

        tracing::info!(session_id = %self.id(), project_id, title = %title, "Project loaded");
        Ok(())
    }

    /// Start a fresh sheet with a template project's fields and a de-duplicated title
    pub async fn create_from_template(
        &self,
        project_id: &str,
        identity: Option<&Identity>,
    ) -> Result<(), PipelineError> {
        let template = self.readable_project(project_id, identity).await?;

        let title = match identity {
            Some(identity) => self.dedupe_title(&template.title, identity).await,
            None => template.title.clone(),
        };

        {
            let mut state = self.state();
            self.reset_locked(&mut state);
            state.model.set_title(title.clone());
            self.emit_change(SheetChange::TitleChanged {
                title: title.clone(),
            });
            for field in &template.keys {
                let field_id = state.model.add_field(field.name.clone());
                self.emit_change(SheetChange::FieldAdded { field_id });
            }
        }

        tracing::info!(
            session_id = %self.id(),
            template_id = project_id,
            title = %title,
            field_count = template.keys.len(),
            "Sheet created from template"
        );
        Ok(())
    }
}
