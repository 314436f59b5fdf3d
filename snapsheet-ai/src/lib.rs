//! snapsheet-ai library interface
//!
//! Exposes the session workflow, service clients and HTTP router for the
//! binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use services::{ExtractionService, ProjectGateway};
use snapsheet_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use uuid::Uuid;
use workflow::SheetSession;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Extraction service shared by all sessions
    pub extractor: Arc<dyn ExtractionService>,
    /// Project store shared by all sessions
    pub gateway: Arc<dyn ProjectGateway>,
    /// Live editing sessions
    pub sessions: Arc<RwLock<HashMap<Uuid, SheetSession>>>,
    /// Directory served under `/images`
    pub blob_root: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        extractor: Arc<dyn ExtractionService>,
        gateway: Arc<dyn ProjectGateway>,
        blob_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            event_bus,
            extractor,
            gateway,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            blob_root: blob_root.into(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Start a new editing session
    pub async fn create_session(&self) -> SheetSession {
        let session = SheetSession::new(
            self.extractor.clone(),
            self.gateway.clone(),
            self.event_bus.clone(),
        );
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        session
    }

    pub async fn session(&self, session_id: Uuid) -> Option<SheetSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Drop a session from the map; None when it was already gone
    pub async fn remove_session(&self, session_id: Uuid) -> Option<SheetSession> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let images = ServeDir::new(&state.blob_root);

    Router::new()
        .merge(api::health_routes())
        .merge(api::session_routes())
        .merge(api::project_routes())
        .nest_service("/images", images)
        .with_state(state)
}
