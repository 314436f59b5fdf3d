//! Server-Sent Events streams
//!
//! - `/sessions/:id/events`: that session's `SheetEvent`s
//! - `/projects/events`: the caller's full project list after every change

use crate::error::{ApiError, ApiResult};
use crate::models::Project;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}

/// GET /sessions/:id/events
///
/// Streams ProcessingStepChanged, SheetUpdated, PipelineFailed,
/// ProjectSaved and ProjectSaveFailed for one session.
pub async fn session_event_stream(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if state.session(session_id).await.is_none() {
        return Err(ApiError::NotFound(format!("Session not found: {}", session_id)));
    }

    info!(session_id = %session_id, "New SSE client connected to session events");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) if event.session_id() == Some(session_id) => {
                            let event_type = event.event_type();
                            match serde_json::to_string(&event) {
                                Ok(event_json) => {
                                    yield Ok(Event::default().event(event_type).data(event_json));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(session_id = %session_id, skipped, "SSE: Client lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// GET /projects/events
///
/// Sends `projects` events carrying the caller's full project list: once on
/// connect, then after every change.
pub async fn project_list_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = super::require_identity(&headers)?;
    info!(user_id = %identity, "New SSE client connected to project list");

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Project>>();
    let subscription = state.gateway.subscribe_projects(
        &identity,
        Box::new(move |projects| {
            let _ = tx.send(projects);
        }),
    );

    let stream = async_stream::stream! {
        // Dropped with the stream when the client disconnects
        let _subscription = subscription;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    yield Ok(Event::default().comment("heartbeat"));
                }

                projects = rx.recv() => {
                    let Some(projects) = projects else { break };
                    match serde_json::to_string(&projects) {
                        Ok(json) => yield Ok(Event::default().event("projects").data(json)),
                        Err(e) => warn!("SSE: Failed to serialize project list: {}", e),
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}
