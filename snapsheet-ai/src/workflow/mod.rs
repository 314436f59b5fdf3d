//! Per-session extraction workflow
//!
//! A `SheetSession` owns one spreadsheet and runs an extraction pipeline for
//! every image added to it:
//! - **First image**: schema discovery → title naming → value extraction
//! - **Later images**: value extraction against the current fields
//!
//! Every phase mutates the sheet as soon as it completes and emits a
//! `SheetEvent`, so observers can render partial progress. When an identity
//! is present the sheet is persisted through the `ProjectGateway`.

mod persistence;
mod pipeline;
mod session;

pub use pipeline::PendingImage;
pub use session::SheetSession;

use crate::services::{ExtractionError, GatewayError};
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Schema discovery or value extraction failed
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Project store failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] GatewayError),

    #[error("Not found: {0}")]
    NotFound(String),
}
