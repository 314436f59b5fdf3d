//! Test Helper Utilities
//!
//! Shared fixtures for snapsheet-ai integration tests: a scripted extraction
//! service and a SQLite-backed project gateway rooted in a temp directory.

#![allow(dead_code)]

use async_trait::async_trait;
use snapsheet_ai::db;
use snapsheet_ai::models::{Identity, ImageFile, Project, ProjectData, ProjectUpdate, StoredBinary};
use snapsheet_ai::services::{
    ExtractionError, ExtractionService, GatewayError, InferredSchema, ProjectCallback,
    ProjectGateway, ProjectSubscription, SqliteProjectGateway,
};
use snapsheet_ai::workflow::SheetSession;
use snapsheet_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const PUBLIC_BASE_URL: &str = "http://localhost:5790/images";

/// Extraction service with canned answers
///
/// Holds can be armed to park a call until the test releases it.
pub struct ScriptedExtractor {
    pub schema: Vec<String>,
    pub values: HashMap<String, String>,
    pub title: String,
    pub fail_schema: bool,
    pub fail_extract: bool,
    pub fail_title: bool,
    schema_hold: Mutex<Option<Arc<Notify>>>,
    extract_hold: Mutex<Option<Arc<Notify>>>,
    /// Field names passed to each extract_values call, in call order
    pub extract_calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExtractor {
    /// Discovers Name and Amount, fills them with Bob and 42, titles "Receipts"
    pub fn receipts() -> Self {
        Self {
            schema: vec!["Name".to_string(), "Amount".to_string()],
            values: HashMap::from([
                ("Name".to_string(), "Bob".to_string()),
                ("Amount".to_string(), "42".to_string()),
            ]),
            title: "Receipts".to_string(),
            fail_schema: false,
            fail_extract: false,
            fail_title: false,
            schema_hold: Mutex::new(None),
            extract_hold: Mutex::new(None),
            extract_calls: Mutex::new(Vec::new()),
        }
    }

    /// Park the next schema discovery until the returned Notify fires
    pub fn hold_schema(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.schema_hold.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Park the next value extraction until the returned Notify fires
    pub fn hold_extract(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.extract_hold.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn extract_calls(&self) -> Vec<Vec<String>> {
        self.extract_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionService for ScriptedExtractor {
    async fn infer_schema(&self, _image: &ImageFile) -> Result<InferredSchema, ExtractionError> {
        let hold = self.schema_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        if self.fail_schema {
            return Err(ExtractionError::Unavailable {
                status: 503,
                body: "schema service down".to_string(),
            });
        }
        Ok(InferredSchema::new(self.schema.clone()))
    }

    async fn extract_values(
        &self,
        _image: &ImageFile,
        field_names: &[String],
    ) -> Result<HashMap<String, String>, ExtractionError> {
        self.extract_calls.lock().unwrap().push(field_names.to_vec());
        let hold = self.extract_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        if self.fail_extract {
            return Err(ExtractionError::Network("connection reset".to_string()));
        }
        Ok(field_names
            .iter()
            .map(|name| {
                let value = self.values.get(name).cloned().unwrap_or_default();
                (name.clone(), value)
            })
            .collect())
    }

    async fn suggest_title(&self, _field_names: &[String]) -> Result<String, ExtractionError> {
        if self.fail_title {
            return Err(ExtractionError::Malformed("no title".to_string()));
        }
        Ok(self.title.clone())
    }
}

/// Single-connection in-memory pool with the projects table
pub async fn create_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");
    pool
}

/// Everything a session test needs; keep `blob_dir` alive for the test
pub struct TestEnv {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub gateway: Arc<SqliteProjectGateway>,
    pub extractor: Arc<ScriptedExtractor>,
    pub blob_dir: TempDir,
}

impl TestEnv {
    pub async fn new(extractor: ScriptedExtractor) -> Self {
        let pool = create_test_db().await;
        let event_bus = EventBus::new(256);
        let blob_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let gateway = Arc::new(SqliteProjectGateway::new(
            pool.clone(),
            event_bus.clone(),
            blob_dir.path(),
            PUBLIC_BASE_URL,
            1000,
        ));

        Self {
            pool,
            event_bus,
            gateway,
            extractor: Arc::new(extractor),
            blob_dir,
        }
    }

    pub fn session(&self) -> SheetSession {
        self.session_with(self.gateway.clone())
    }

    pub fn session_with(&self, gateway: Arc<dyn ProjectGateway>) -> SheetSession {
        SheetSession::new(self.extractor.clone(), gateway, self.event_bus.clone())
    }
}

pub fn identity(user_id: &str) -> Identity {
    Identity::new(user_id).expect("non-blank user id")
}

pub fn receipt_image(name: &str) -> ImageFile {
    ImageFile::new(name, b"\x89PNG fake receipt bytes".to_vec())
}

/// Gateway whose writes can be switched to fail; reads pass through
///
/// `fail_writes` covers project writes, `fail_uploads` covers binaries.
pub struct FlakyGateway {
    pub inner: Arc<SqliteProjectGateway>,
    pub fail_writes: AtomicBool,
    pub fail_uploads: AtomicBool,
    upload_hold: Mutex<Option<Arc<Notify>>>,
    upload_calls: AtomicUsize,
}

impl FlakyGateway {
    pub fn new(inner: Arc<SqliteProjectGateway>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(true),
            fail_uploads: AtomicBool::new(true),
            upload_hold: Mutex::new(None),
            upload_calls: AtomicUsize::new(0),
        }
    }

    /// Everything passes through until a flag is set
    pub fn healthy(inner: Arc<SqliteProjectGateway>) -> Self {
        let gateway = Self::new(inner);
        gateway.fail_writes.store(false, Ordering::SeqCst);
        gateway.fail_uploads.store(false, Ordering::SeqCst);
        gateway
    }

    /// Park the next upload until the returned Notify fires
    pub fn hold_upload(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.upload_hold.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Uploads started so far, parked ones included
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool) -> Result<(), GatewayError> {
        if flag.load(Ordering::SeqCst) {
            return Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store offline",
            )));
        }
        Ok(())
    }
}

/// Number of files anywhere under `dir`
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[async_trait]
impl ProjectGateway for FlakyGateway {
    async fn create_project(
        &self,
        identity: &Identity,
        data: ProjectData,
    ) -> Result<String, GatewayError> {
        Self::check(&self.fail_writes)?;
        self.inner.create_project(identity, data).await
    }

    async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<(), GatewayError> {
        Self::check(&self.fail_writes)?;
        self.inner.update_project(project_id, update).await
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, GatewayError> {
        self.inner.get_project(project_id).await
    }

    async fn list_projects(&self, identity: &Identity) -> Result<Vec<Project>, GatewayError> {
        self.inner.list_projects(identity).await
    }

    fn subscribe_projects(
        &self,
        identity: &Identity,
        on_change: ProjectCallback,
    ) -> ProjectSubscription {
        self.inner.subscribe_projects(identity, on_change)
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), GatewayError> {
        Self::check(&self.fail_writes)?;
        self.inner.delete_project(project_id).await
    }

    async fn upload_binary(
        &self,
        image: &ImageFile,
        identity: &Identity,
        project_id: &str,
        column_id: &str,
    ) -> Result<StoredBinary, GatewayError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.upload_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        Self::check(&self.fail_uploads)?;
        self.inner
            .upload_binary(image, identity, project_id, column_id)
            .await
    }

    async fn delete_binary(&self, storage_path: &str) {
        self.inner.delete_binary(storage_path).await
    }
}
