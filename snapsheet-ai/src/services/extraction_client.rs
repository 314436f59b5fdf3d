//! Remote extraction seam
//!
//! Schema discovery, value extraction and title suggestion are delegated to
//! an external service. The orchestrator only sees this trait, so tests can
//! substitute a scripted implementation.

use crate::models::ImageFile;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Extraction client errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Non-2xx upstream response
    #[error("Extraction service unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },

    /// Response could not be parsed
    #[error("Malformed extraction response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Field names discovered on an image, in the order the service returned them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredSchema {
    pub field_names: Vec<String>,
}

impl InferredSchema {
    pub fn new(field_names: Vec<String>) -> Self {
        Self { field_names }
    }

    pub fn is_empty(&self) -> bool {
        self.field_names.is_empty()
    }

    /// Flat name → "" map, as consumed by the sheet
    pub fn empty_values(&self) -> HashMap<String, String> {
        self.field_names
            .iter()
            .map(|name| (name.clone(), String::new()))
            .collect()
    }
}

/// External extraction service
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Discover field names on an image
    async fn infer_schema(&self, image: &ImageFile) -> Result<InferredSchema, ExtractionError>;

    /// Fill in values for the given field names
    ///
    /// Returns display name → value; names the service could not fill map to "".
    async fn extract_values(
        &self,
        image: &ImageFile,
        field_names: &[String],
    ) -> Result<HashMap<String, String>, ExtractionError>;

    /// Suggest a short title describing a field set
    async fn suggest_title(&self, field_names: &[String]) -> Result<String, ExtractionError>;
}
