//! Persisted project aggregate

use super::sheet::{Column, Field, Sheet, StoredBinary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque user id; its presence enables persistence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Returns None for an empty or whitespace-only id
    pub fn new(user_id: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            None
        } else {
            Some(Self(user_id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted form of a Column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectColumn {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    /// Remote URL, or the local URL when the upload failed
    pub image_url: String,
    /// Blob-store path; None when the binary was never uploaded
    pub storage_path: Option<String>,
    pub values: HashMap<String, String>,
    pub uploaded_at: DateTime<Utc>,
}

impl ProjectColumn {
    /// Column as restored into a sheet; the stored binary is remembered
    pub fn to_column(&self) -> Column {
        let stored = self
            .storage_path
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|path| StoredBinary {
                url: self.image_url.clone(),
                storage_path: path.clone(),
                content_type: self.file_type.clone(),
                size: self.file_size,
            });
        Column {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_url: self.image_url.clone(),
            values: self.values.clone(),
            stored,
        }
    }
}

/// Body of a create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectData {
    pub title: String,
    pub keys: Vec<Field>,
    pub columns: Vec<ProjectColumn>,
    #[serde(default)]
    pub is_public: bool,
}

/// Partial update; None leaves the stored value as it is
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub keys: Option<Vec<Field>>,
    pub columns: Option<Vec<ProjectColumn>>,
    pub is_public: Option<bool>,
}

impl From<ProjectData> for ProjectUpdate {
    fn from(data: ProjectData) -> Self {
        Self {
            title: Some(data.title),
            keys: Some(data.keys),
            columns: Some(data.columns),
            is_public: Some(data.is_public),
        }
    }
}

/// A persisted Sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub keys: Vec<Field>,
    pub columns: Vec<ProjectColumn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_public: bool,
}

impl Project {
    /// Owners read their own projects; anyone reads public ones
    pub fn readable_by(&self, identity: Option<&Identity>) -> bool {
        self.is_public || identity.is_some_and(|i| i.as_str() == self.user_id)
    }

    /// Storage paths of every uploaded binary
    pub fn storage_paths(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter_map(|c| c.storage_path.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Working copy of this project, bound to it for later saves
    pub fn into_sheet(self) -> Sheet {
        let columns = self.columns.iter().map(ProjectColumn::to_column).collect();
        Sheet {
            title: self.title,
            keys: self.keys,
            columns,
            current_project_id: Some(self.id),
        }
    }
}
