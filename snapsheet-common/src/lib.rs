//! # SnapSheet Common Library
//!
//! Shared code for the SnapSheet workspace:
//! - Error and Result types
//! - Event types (SheetEvent enum) and the EventBus
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
