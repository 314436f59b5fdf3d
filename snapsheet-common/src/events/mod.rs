//! Event types for the SnapSheet event system
//!
//! Provides the shared event definitions and the EventBus used by sessions,
//! the persistence gateway and the SSE handlers.

mod sheet_types;

pub use sheet_types::{ProcessingStep, SheetChange};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// SnapSheet event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SheetEvent {
    /// Editing session created
    SessionStarted {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline step changed
    ///
    /// Triggers:
    /// - SSE: Update progress indicator
    ProcessingStepChanged {
        session_id: Uuid,
        old_step: ProcessingStep,
        new_step: ProcessingStep,
        /// Whether any pipeline is still in flight after this transition
        is_processing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sheet contents changed
    ///
    /// Triggers:
    /// - SSE: Re-render grid (partial progress is visible after every phase)
    SheetUpdated {
        session_id: Uuid,
        change: SheetChange,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One image's pipeline failed; its column stays with partial values
    PipelineFailed {
        session_id: Uuid,
        column_id: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sheet persisted
    ProjectSaved {
        session_id: Uuid,
        project_id: String,
        /// True when this save created the project
        created: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sheet persistence failed (non-fatal, next save retries everything)
    ProjectSaveFailed {
        session_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A user's persisted project set changed
    ///
    /// Triggers:
    /// - Project subscriptions: re-list and deliver the full set
    ProjectsChanged {
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SheetEvent {
    /// Event name for SSE `event:` lines
    pub fn event_type(&self) -> &'static str {
        match self {
            SheetEvent::SessionStarted { .. } => "SessionStarted",
            SheetEvent::ProcessingStepChanged { .. } => "ProcessingStepChanged",
            SheetEvent::SheetUpdated { .. } => "SheetUpdated",
            SheetEvent::PipelineFailed { .. } => "PipelineFailed",
            SheetEvent::ProjectSaved { .. } => "ProjectSaved",
            SheetEvent::ProjectSaveFailed { .. } => "ProjectSaveFailed",
            SheetEvent::ProjectsChanged { .. } => "ProjectsChanged",
        }
    }

    /// Session this event belongs to, if it is session-scoped
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            SheetEvent::SessionStarted { session_id, .. }
            | SheetEvent::ProcessingStepChanged { session_id, .. }
            | SheetEvent::SheetUpdated { session_id, .. }
            | SheetEvent::PipelineFailed { session_id, .. }
            | SheetEvent::ProjectSaved { session_id, .. }
            | SheetEvent::ProjectSaveFailed { session_id, .. } => Some(*session_id),
            SheetEvent::ProjectsChanged { .. } => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use snapsheet_common::events::{EventBus, SheetEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SheetEvent::ProjectsChanged {
///     user_id: "u1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SheetEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SheetEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SheetEvent,
    ) -> Result<usize, broadcast::error::SendError<SheetEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SheetEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
