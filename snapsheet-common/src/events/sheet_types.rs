//! Supporting types for sheet session events

use serde::{Deserialize, Serialize};

/// Pipeline step of a sheet session
///
/// idle → generating-schema → naming-schema → extracting-values → complete,
/// with a return to idle whenever a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingStep {
    /// Nothing running (initial state, and the state after a failure)
    #[default]
    Idle,
    /// Inferring the field set from the first image
    GeneratingSchema,
    /// Asking for a title that describes the inferred fields
    NamingSchema,
    /// Filling in values for one image
    ExtractingValues,
    /// Last pipeline finished successfully
    Complete,
}

impl ProcessingStep {
    /// Wire name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Idle => "idle",
            ProcessingStep::GeneratingSchema => "generating-schema",
            ProcessingStep::NamingSchema => "naming-schema",
            ProcessingStep::ExtractingValues => "extracting-values",
            ProcessingStep::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What changed in a sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheetChange {
    /// Optimistic column appended for a new image
    ColumnAdded { column_id: String },
    /// Field set discovered from the first image
    SchemaEstablished { field_count: usize },
    /// Sheet title changed
    TitleChanged { title: String },
    /// Extracted values written into a column
    ValuesExtracted { column_id: String, written: usize },
    /// Field appended
    FieldAdded { field_id: String },
    /// Field renamed
    FieldRenamed { field_id: String },
    /// Field removed (values cascaded)
    FieldRemoved { field_id: String },
    /// Single cell edited
    CellEdited { column_id: String, field_id: String },
    /// Column removed
    ColumnRemoved { column_id: String },
    /// Sheet cleared to defaults
    Reset,
    /// Sheet replaced by a persisted project
    Loaded { project_id: String },
}
