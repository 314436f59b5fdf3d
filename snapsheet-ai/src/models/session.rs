//! Extraction session status
//!
//! Pipeline progress: idle → generating-schema → naming-schema → extracting-values → complete.
//! Any failing step returns to idle.

use super::sheet::Sheet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapsheet_common::events::ProcessingStep;
use uuid::Uuid;

/// Step transition record, emitted as `ProcessingStepChanged`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTransition {
    pub session_id: Uuid,
    pub old_step: ProcessingStep,
    pub new_step: ProcessingStep,
    pub is_processing: bool,
    pub transitioned_at: DateTime<Utc>,
}

/// Processing flags of one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStatus {
    /// Current pipeline step
    pub step: ProcessingStep,

    /// Pipelines started but not yet finished
    pub in_flight: usize,

    /// True while a save is running
    pub is_saving: bool,

    /// Completion time of the last successful save
    pub last_saved: Option<DateTime<Utc>>,
}

impl ProcessingStatus {
    pub fn is_processing(&self) -> bool {
        self.in_flight > 0
    }

    /// Transition to new step
    pub fn transition_to(&mut self, session_id: Uuid, new_step: ProcessingStep) -> StepTransition {
        let transition = StepTransition {
            session_id,
            old_step: self.step,
            new_step,
            is_processing: self.is_processing(),
            transitioned_at: Utc::now(),
        };
        self.step = new_step;
        transition
    }

    pub fn pipeline_started(&mut self) {
        self.in_flight += 1;
    }

    pub fn pipeline_finished(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

/// Serializable view of a session for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub sheet: Sheet,
    pub processing_step: ProcessingStep,
    pub is_processing: bool,
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
}
