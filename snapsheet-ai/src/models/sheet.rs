//! Spreadsheet model
//!
//! The Sheet is the working copy of one extraction session: a title, an
//! ordered list of Fields (table headers) and an ordered list of Columns
//! (one per uploaded image, holding that image's row of values).
//!
//! All mutations go through [`SpreadsheetModel`]. They are synchronous and
//! total: unknown ids are ignored rather than reported.

use super::resources::{is_local_url, DisplayResources};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Title of a fresh sheet
pub const DEFAULT_SHEET_TITLE: &str = "My Extracted Data";

/// A named output column applied to every row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("key_{}", Uuid::new_v4().simple()),
            name: name.into(),
        }
    }
}

/// Location of an uploaded binary in the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBinary {
    /// Retrieval URL
    pub url: String,
    /// Blob-store path, used for deletion
    pub storage_path: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// One uploaded image and its row of values (keyed by Field id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub file_name: String,
    /// `blob:` URL while local, remote URL once loaded from a project
    pub file_url: String,
    pub values: HashMap<String, String>,
    /// Set once the binary has been uploaded, so later saves reuse it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredBinary>,
}

impl Column {
    /// Empty column for a freshly added image
    pub fn new(file_name: impl Into<String>, file_url: impl Into<String>) -> Self {
        Self {
            id: format!("col_{}", Uuid::new_v4().simple()),
            file_name: file_name.into(),
            file_url: file_url.into(),
            values: HashMap::new(),
            stored: None,
        }
    }

    pub fn is_locally_owned(&self) -> bool {
        is_local_url(&self.file_url)
    }
}

/// In-memory working copy of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub title: String,
    pub keys: Vec<Field>,
    pub columns: Vec<Column>,
    /// Set after the first successful save; later saves update this project
    pub current_project_id: Option<String>,
}

impl Default for Sheet {
    fn default() -> Self {
        Self {
            title: DEFAULT_SHEET_TITLE.to_string(),
            keys: Vec::new(),
            columns: Vec::new(),
            current_project_id: None,
        }
    }
}

impl Sheet {
    /// No fields and no columns: the next image discovers the schema
    pub fn is_fresh(&self) -> bool {
        self.columns.is_empty() && self.keys.is_empty()
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SHEET_TITLE
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.keys.iter().find(|k| k.id == field_id)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.name.clone()).collect()
    }

    fn column_mut(&mut self, column_id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == column_id)
    }
}

/// Sheet plus the display-resource registry its `blob:` URLs live in
pub struct SpreadsheetModel {
    sheet: Sheet,
    resources: Arc<dyn DisplayResources>,
}

impl SpreadsheetModel {
    pub fn new(resources: Arc<dyn DisplayResources>) -> Self {
        Self {
            sheet: Sheet::default(),
            resources,
        }
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn resources(&self) -> &Arc<dyn DisplayResources> {
        &self.resources
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.sheet.title = title.into();
    }

    /// Append a Field and backfill an empty value into every column
    pub fn add_field(&mut self, name: impl Into<String>) -> String {
        let field = Field::new(name);
        let field_id = field.id.clone();
        for column in &mut self.sheet.columns {
            column.values.insert(field_id.clone(), String::new());
        }
        self.sheet.keys.push(field);
        field_id
    }

    /// Returns false when the field does not exist
    pub fn rename_field(&mut self, field_id: &str, name: impl Into<String>) -> bool {
        match self.sheet.keys.iter_mut().find(|k| k.id == field_id) {
            Some(field) => {
                field.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Drop a Field and its value from every column
    pub fn remove_field(&mut self, field_id: &str) -> bool {
        let before = self.sheet.keys.len();
        self.sheet.keys.retain(|k| k.id != field_id);
        for column in &mut self.sheet.columns {
            column.values.remove(field_id);
        }
        self.sheet.keys.len() != before
    }

    /// Returns false when the column or the field does not exist
    pub fn set_cell_value(
        &mut self,
        column_id: &str,
        field_id: &str,
        value: impl Into<String>,
    ) -> bool {
        if self.sheet.field(field_id).is_none() {
            return false;
        }
        match self.sheet.column_mut(column_id) {
            Some(column) => {
                column.values.insert(field_id.to_string(), value.into());
                true
            }
            None => false,
        }
    }

    /// Cell value, or the empty string when absent
    pub fn get_cell_value(&self, column_id: &str, field_id: &str) -> String {
        self.sheet
            .column(column_id)
            .and_then(|c| c.values.get(field_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a column, releasing its `blob:` URL if it owns one
    pub fn remove_column(&mut self, column_id: &str) -> Option<Column> {
        let index = self.sheet.columns.iter().position(|c| c.id == column_id)?;
        let column = self.sheet.columns.remove(index);
        if column.is_locally_owned() {
            self.resources.release(&column.file_url);
        }
        Some(column)
    }

    /// Clear to an empty default sheet, releasing every `blob:` URL
    pub fn reset(&mut self) {
        let old = std::mem::take(&mut self.sheet);
        self.release_all(&old);
    }

    /// Replace the sheet wholesale (project load), releasing the old `blob:` URLs
    pub fn replace_with(&mut self, sheet: Sheet) {
        let old = std::mem::replace(&mut self.sheet, sheet);
        self.release_all(&old);
    }

    fn release_all(&self, sheet: &Sheet) {
        for column in sheet.columns.iter().filter(|c| c.is_locally_owned()) {
            self.resources.release(&column.file_url);
        }
    }

    /// Append a column, backfilling empty values for the current Fields
    pub fn push_column(&mut self, mut column: Column) {
        for field in &self.sheet.keys {
            column.values.entry(field.id.clone()).or_default();
        }
        self.sheet.columns.push(column);
    }

    /// Mint Fields for discovered names and backfill them into every column
    ///
    /// Fields added by hand while discovery was running are kept ahead of the
    /// discovered ones.
    pub fn establish_schema<I, S>(&mut self, names: I) -> Vec<Field>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<Field> = names.into_iter().map(Field::new).collect();
        for column in &mut self.sheet.columns {
            for field in &fields {
                column.values.entry(field.id.clone()).or_default();
            }
        }
        self.sheet.keys.extend(fields.iter().cloned());
        fields
    }

    /// Write extracted values into one column, matching names to live Fields
    ///
    /// A name is matched against the Fields as they are now; a value whose
    /// Field was renamed or removed meanwhile is dropped. Returns the number
    /// of cells written, or None when the column is gone.
    pub fn apply_extracted(
        &mut self,
        column_id: &str,
        values_by_name: &HashMap<String, String>,
    ) -> Option<usize> {
        let matched: Vec<(String, String)> = values_by_name
            .iter()
            .filter_map(|(name, value)| {
                self.sheet
                    .keys
                    .iter()
                    .find(|k| &k.name == name)
                    .map(|k| (k.id.clone(), value.clone()))
            })
            .collect();

        let column = self.sheet.column_mut(column_id)?;
        let written = matched.len();
        for (field_id, value) in matched {
            column.values.insert(field_id, value);
        }
        Some(written)
    }

    pub fn set_current_project_id(&mut self, project_id: impl Into<String>) {
        self.sheet.current_project_id = Some(project_id.into());
    }

    /// Remember where a column's binary was uploaded; false when the column is gone
    ///
    /// The column switches to the stored URL and its `blob:` URL is released.
    pub fn record_stored_binary(&mut self, column_id: &str, stored: StoredBinary) -> bool {
        let Some(column) = self.sheet.column_mut(column_id) else {
            return false;
        };
        let local_url = column
            .is_locally_owned()
            .then(|| std::mem::replace(&mut column.file_url, stored.url.clone()));
        column.stored = Some(stored);

        if let Some(url) = local_url {
            self.resources.release(&url);
        }
        true
    }

    /// CSV rendering: one header row of field names, one row per column
    ///
    /// Returns an empty string when there are no fields.
    pub fn export_csv(&self) -> Result<String, csv::Error> {
        if self.sheet.keys.is_empty() {
            return Ok(String::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.sheet.keys.iter().map(|k| k.name.as_str()))?;
        for column in &self.sheet.columns {
            writer.write_record(
                self.sheet
                    .keys
                    .iter()
                    .map(|k| column.values.get(&k.id).map(String::as_str).unwrap_or("")),
            )?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
