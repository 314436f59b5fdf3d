//! Data models for snapsheet-ai
//!
//! - Sheet / Field / Column: the in-memory working copy and its mutations
//! - Project: the persisted counterpart of a Sheet
//! - Session status: pipeline step tracking

pub mod image;
pub mod project;
pub mod resources;
pub mod session;
pub mod sheet;

pub use image::ImageFile;
pub use project::{Identity, Project, ProjectColumn, ProjectData, ProjectUpdate};
pub use resources::{is_local_url, DisplayResources, LocalResources, LOCAL_URL_PREFIX};
pub use session::{ProcessingStatus, SessionSnapshot, StepTransition};
pub use sheet::{Column, Field, Sheet, SpreadsheetModel, StoredBinary, DEFAULT_SHEET_TITLE};
pub use snapsheet_common::events::ProcessingStep;
