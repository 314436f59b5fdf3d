//! Session state and direct edits

use crate::models::{
    DisplayResources, LocalResources, ProcessingStatus, ProcessingStep, SessionSnapshot, Sheet,
    SpreadsheetModel,
};
use crate::services::{ExtractionService, ProjectGateway};
use chrono::Utc;
use snapsheet_common::events::{EventBus, SheetChange, SheetEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

/// One spreadsheet editing session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SheetSession {
    pub(super) inner: Arc<SessionInner>,
}

pub(super) struct SessionInner {
    pub(super) id: Uuid,
    state: Mutex<SessionState>,
    pub(super) extractor: Arc<dyn ExtractionService>,
    pub(super) gateway: Arc<dyn ProjectGateway>,
    pub(super) event_bus: EventBus,
    /// Number of schema discoveries in flight; later images wait for zero
    pub(super) schema_gate: watch::Sender<usize>,
    /// Serializes saves so a project is created at most once
    pub(super) save_lock: tokio::sync::Mutex<()>,
    /// Storage prefix for binaries uploaded before the project has an id
    pub(super) temp_project_id: String,
}

pub(super) struct SessionState {
    pub(super) model: SpreadsheetModel,
    pub(super) status: ProcessingStatus,
    /// Bumped on reset and load; work started under an older generation is discarded
    pub(super) generation: u64,
}

impl SheetSession {
    /// Create a session with in-memory display resources
    pub fn new(
        extractor: Arc<dyn ExtractionService>,
        gateway: Arc<dyn ProjectGateway>,
        event_bus: EventBus,
    ) -> Self {
        Self::with_resources(extractor, gateway, event_bus, Arc::new(LocalResources::new()))
    }

    pub fn with_resources(
        extractor: Arc<dyn ExtractionService>,
        gateway: Arc<dyn ProjectGateway>,
        event_bus: EventBus,
        resources: Arc<dyn DisplayResources>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (schema_gate, _) = watch::channel(0usize);

        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                state: Mutex::new(SessionState {
                    model: SpreadsheetModel::new(resources),
                    status: ProcessingStatus::default(),
                    generation: 0,
                }),
                extractor,
                gateway,
                event_bus,
                schema_gate,
                save_lock: tokio::sync::Mutex::new(()),
                temp_project_id: format!("temp_{}", Uuid::new_v4().simple()),
            }),
        };

        tracing::info!(session_id = %id, "Sheet session started");
        session.inner.event_bus.emit_lossy(SheetEvent::SessionStarted {
            session_id: id,
            timestamp: Utc::now(),
        });

        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub(super) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` only if no reset or load happened since `generation`
    pub(super) fn with_current<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Option<R> {
        let mut state = self.state();
        if state.generation != generation {
            tracing::debug!(session_id = %self.id(), generation, "Discarding stale pipeline write");
            return None;
        }
        Some(f(&mut state))
    }

    pub(super) fn emit_change(&self, change: SheetChange) {
        self.inner.event_bus.emit_lossy(SheetEvent::SheetUpdated {
            session_id: self.id(),
            change,
            timestamp: Utc::now(),
        });
    }

    /// Transition the step and emit `ProcessingStepChanged`; caller holds the state lock
    pub(super) fn set_step(&self, state: &mut SessionState, new_step: ProcessingStep) {
        let transition = state.status.transition_to(self.id(), new_step);
        tracing::info!(
            session_id = %self.id(),
            old_step = %transition.old_step,
            new_step = %transition.new_step,
            is_processing = transition.is_processing,
            "Processing step changed"
        );
        self.inner.event_bus.emit_lossy(SheetEvent::ProcessingStepChanged {
            session_id: transition.session_id,
            old_step: transition.old_step,
            new_step: transition.new_step,
            is_processing: transition.is_processing,
            timestamp: transition.transitioned_at,
        });
    }

    /// Serializable view for rendering
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            session_id: self.id(),
            sheet: state.model.sheet().clone(),
            processing_step: state.status.step,
            is_processing: state.status.is_processing(),
            is_saving: state.status.is_saving,
            last_saved: state.status.last_saved,
        }
    }

    pub fn sheet(&self) -> Sheet {
        self.state().model.sheet().clone()
    }

    pub fn processing_step(&self) -> ProcessingStep {
        self.state().status.step
    }

    pub fn is_processing(&self) -> bool {
        self.state().status.is_processing()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        let mut state = self.state();
        state.model.set_title(title.clone());
        self.emit_change(SheetChange::TitleChanged { title });
    }

    /// Append a field; returns its id
    pub fn add_field(&self, name: impl Into<String>) -> String {
        let mut state = self.state();
        let field_id = state.model.add_field(name);
        self.emit_change(SheetChange::FieldAdded {
            field_id: field_id.clone(),
        });
        field_id
    }

    pub fn rename_field(&self, field_id: &str, name: impl Into<String>) -> bool {
        let mut state = self.state();
        let renamed = state.model.rename_field(field_id, name);
        if renamed {
            self.emit_change(SheetChange::FieldRenamed {
                field_id: field_id.to_string(),
            });
        }
        renamed
    }

    pub fn remove_field(&self, field_id: &str) -> bool {
        let mut state = self.state();
        let removed = state.model.remove_field(field_id);
        if removed {
            self.emit_change(SheetChange::FieldRemoved {
                field_id: field_id.to_string(),
            });
        }
        removed
    }

    pub fn set_cell_value(&self, column_id: &str, field_id: &str, value: impl Into<String>) -> bool {
        let mut state = self.state();
        let set = state.model.set_cell_value(column_id, field_id, value);
        if set {
            self.emit_change(SheetChange::CellEdited {
                column_id: column_id.to_string(),
                field_id: field_id.to_string(),
            });
        }
        set
    }

    pub fn get_cell_value(&self, column_id: &str, field_id: &str) -> String {
        self.state().model.get_cell_value(column_id, field_id)
    }

    /// Clear the sheet and release every local display resource
    ///
    /// Pipelines still in flight finish without writing.
    pub fn reset(&self) {
        let mut state = self.state();
        self.reset_locked(&mut state);
    }

    pub(super) fn reset_locked(&self, state: &mut SessionState) {
        state.generation += 1;
        state.model.reset();
        state.status.in_flight = 0;
        state.status.last_saved = None;
        self.set_step(state, ProcessingStep::Idle);
        self.emit_change(SheetChange::Reset);
        tracing::info!(session_id = %self.id(), "Sheet reset");
    }

    /// CSV rendering of the sheet; empty when there are no fields
    pub fn export_csv(&self) -> Result<String, csv::Error> {
        self.state().model.export_csv()
    }
}
