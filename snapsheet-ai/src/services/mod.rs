//! External service clients
//!
//! - Extraction: schema discovery, value extraction, title suggestion
//! - Project gateway: persisted projects and their image binaries

pub mod extraction_client;
pub mod project_gateway;
pub mod title_namer;
pub mod upstage_client;

pub use extraction_client::{ExtractionError, ExtractionService, InferredSchema};
pub use project_gateway::{
    GatewayError, ProjectCallback, ProjectGateway, ProjectSubscription, SqliteProjectGateway,
};
pub use title_namer::{timestamp_title, unique_title};
pub use upstage_client::UpstageClient;
