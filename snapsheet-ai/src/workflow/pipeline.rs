//! Image extraction pipeline
//!
//! `add_image` does the synchronous part (optimistic column, step, schema
//! gate) at call time. The returned `PendingImage` runs the network phases
//! when awaited.

use super::session::SheetSession;
use super::PipelineError;
use crate::models::{Column, Identity, ImageFile, ProcessingStep};
use crate::services::{timestamp_title, unique_title};
use chrono::{Local, Utc};
use futures::future::{BoxFuture, FutureExt};
use snapsheet_common::events::{SheetChange, SheetEvent};
use std::future::IntoFuture;

/// An accepted image whose pipeline runs when awaited
///
/// Dropping it without awaiting abandons the pipeline; the column stays.
pub struct PendingImage {
    column_id: String,
    future: BoxFuture<'static, Result<(), PipelineError>>,
}

impl PendingImage {
    /// Id of the optimistic column appended for this image
    pub fn column_id(&self) -> &str {
        &self.column_id
    }
}

impl IntoFuture for PendingImage {
    type Output = Result<(), PipelineError>;
    type IntoFuture = BoxFuture<'static, Result<(), PipelineError>>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

/// Accounts one in-flight pipeline; settles as idle if dropped unsettled
struct PipelineTicket {
    session: SheetSession,
    generation: u64,
    column_id: String,
    settled: bool,
}

impl PipelineTicket {
    fn settle(mut self, step: ProcessingStep) {
        self.settled = true;
        self.session.finish_pipeline(self.generation, step);
    }
}

impl Drop for PipelineTicket {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                session_id = %self.session.id(),
                column_id = %self.column_id,
                "Pipeline abandoned before completion"
            );
            self.session.finish_pipeline(self.generation, ProcessingStep::Idle);
        }
    }
}

/// Holds the schema gate closed until released or dropped
struct SchemaDiscovery {
    session: SheetSession,
    released: bool,
}

impl SchemaDiscovery {
    fn begin(session: SheetSession) -> Self {
        session.inner.schema_gate.send_modify(|pending| *pending += 1);
        Self {
            session,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.session
                .inner
                .schema_gate
                .send_modify(|pending| *pending = pending.saturating_sub(1));
        }
    }
}

impl Drop for SchemaDiscovery {
    fn drop(&mut self) {
        self.release();
    }
}

impl SheetSession {
    /// Accept an image and start its pipeline
    ///
    /// The column is appended before this returns, so columns keep call
    /// order. The first image of a fresh sheet discovers the schema; later
    /// images wait for that discovery and extract against the current fields.
    pub fn add_image(&self, image: ImageFile, identity: Option<Identity>) -> PendingImage {
        let (column_id, generation, discovery) = {
            let mut state = self.state();
            let url = state.model.resources().allocate(image.clone());
            let column = Column::new(image.file_name.clone(), url);
            let column_id = column.id.clone();

            let first_image = state.model.sheet().is_fresh();
            state.model.push_column(column);
            state.status.pipeline_started();

            let step = if first_image {
                ProcessingStep::GeneratingSchema
            } else {
                ProcessingStep::ExtractingValues
            };
            self.set_step(&mut state, step);
            self.emit_change(SheetChange::ColumnAdded {
                column_id: column_id.clone(),
            });

            let discovery = first_image.then(|| SchemaDiscovery::begin(self.clone()));
            (column_id, state.generation, discovery)
        };

        tracing::info!(
            session_id = %self.id(),
            column_id = %column_id,
            file_name = %image.file_name,
            first_image = discovery.is_some(),
            "Image accepted"
        );

        let ticket = PipelineTicket {
            session: self.clone(),
            generation,
            column_id: column_id.clone(),
            settled: false,
        };
        let session = self.clone();
        let future = async move {
            session
                .run_pipeline(ticket, image, identity, discovery)
                .await
        }
        .boxed();

        PendingImage { column_id, future }
    }

    async fn run_pipeline(
        self,
        ticket: PipelineTicket,
        image: ImageFile,
        identity: Option<Identity>,
        discovery: Option<SchemaDiscovery>,
    ) -> Result<(), PipelineError> {
        let outcome = match discovery {
            Some(discovery) => {
                self.first_image(&ticket, &image, identity.as_ref(), discovery)
                    .await
            }
            None => self.subsequent_image(&ticket, &image, identity.as_ref()).await,
        };

        match outcome {
            Ok(()) => {
                tracing::info!(session_id = %self.id(), column_id = %ticket.column_id, "Image processed");
                ticket.settle(ProcessingStep::Complete);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.id(),
                    column_id = %ticket.column_id,
                    error = %e,
                    "Image pipeline failed"
                );
                self.with_current(ticket.generation, |_| {
                    self.inner.event_bus.emit_lossy(SheetEvent::PipelineFailed {
                        session_id: self.id(),
                        column_id: ticket.column_id.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                });
                ticket.settle(ProcessingStep::Idle);
                Err(e)
            }
        }
    }

    async fn first_image(
        &self,
        ticket: &PipelineTicket,
        image: &ImageFile,
        identity: Option<&Identity>,
        mut discovery: SchemaDiscovery,
    ) -> Result<(), PipelineError> {
        let generation = ticket.generation;
        let schema = self.inner.extractor.infer_schema(image).await?;

        let Some(fields) = self.with_current(generation, |state| {
            let fields = state.model.establish_schema(schema.field_names.iter().cloned());
            self.emit_change(SheetChange::SchemaEstablished {
                field_count: fields.len(),
            });
            fields
        }) else {
            return Ok(());
        };
        discovery.release();

        tracing::info!(session_id = %self.id(), field_count = fields.len(), "Schema established");

        let field_names: Vec<String> = fields.into_iter().map(|f| f.name).collect();
        if field_names.is_empty() {
            tracing::warn!(session_id = %self.id(), "Schema discovery found no fields");
            return Ok(());
        }

        self.advance(generation, ProcessingStep::NamingSchema);
        self.name_sheet(generation, &field_names, identity).await;

        if let Some(identity) = identity {
            self.save_logged(identity, "schema naming").await;
        }

        self.advance(generation, ProcessingStep::ExtractingValues);
        self.extract_into(ticket, image, &field_names).await?;

        if let Some(identity) = identity {
            self.save_logged(identity, "extraction").await;
        }
        Ok(())
    }

    async fn subsequent_image(
        &self,
        ticket: &PipelineTicket,
        image: &ImageFile,
        identity: Option<&Identity>,
    ) -> Result<(), PipelineError> {
        self.wait_for_schema().await;

        let Some(field_names) =
            self.with_current(ticket.generation, |state| state.model.sheet().field_names())
        else {
            return Ok(());
        };
        if field_names.is_empty() {
            tracing::debug!(session_id = %self.id(), column_id = %ticket.column_id, "No fields to extract");
            return Ok(());
        }

        self.advance(ticket.generation, ProcessingStep::ExtractingValues);
        self.extract_into(ticket, image, &field_names).await?;

        if let Some(identity) = identity {
            self.save_logged(identity, "additional image").await;
        }
        Ok(())
    }

    async fn wait_for_schema(&self) {
        let mut gate = self.inner.schema_gate.subscribe();
        // The sender lives as long as the session, so this cannot fail
        let _ = gate.wait_for(|pending| *pending == 0).await;
    }

    fn advance(&self, generation: u64, step: ProcessingStep) {
        self.with_current(generation, |state| self.set_step(state, step));
    }

    /// Extract values and write them into the ticket's column by live name match
    async fn extract_into(
        &self,
        ticket: &PipelineTicket,
        image: &ImageFile,
        field_names: &[String],
    ) -> Result<(), PipelineError> {
        let values = self.inner.extractor.extract_values(image, field_names).await?;

        self.with_current(ticket.generation, |state| {
            match state.model.apply_extracted(&ticket.column_id, &values) {
                Some(written) => {
                    tracing::info!(
                        session_id = %self.id(),
                        column_id = %ticket.column_id,
                        written,
                        "Values extracted"
                    );
                    self.emit_change(SheetChange::ValuesExtracted {
                        column_id: ticket.column_id.clone(),
                        written,
                    });
                }
                None => {
                    tracing::debug!(
                        session_id = %self.id(),
                        column_id = %ticket.column_id,
                        "Column removed during extraction, values dropped"
                    );
                }
            }
        });
        Ok(())
    }

    /// Suggest a title and apply it if the sheet still has the default one
    async fn name_sheet(&self, generation: u64, field_names: &[String], identity: Option<&Identity>) {
        let suggested = match self.inner.extractor.suggest_title(field_names).await {
            Ok(title) => title,
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "Title suggestion failed, keeping current title");
                return;
            }
        };

        let title = match identity {
            Some(identity) => self.dedupe_title(&suggested, identity).await,
            None => suggested,
        };

        self.with_current(generation, |state| {
            if state.model.sheet().has_default_title() {
                state.model.set_title(title.clone());
                self.emit_change(SheetChange::TitleChanged { title });
            }
        });
    }

    /// Make `base` unique among `identity`'s project titles
    pub(super) async fn dedupe_title(&self, base: &str, identity: &Identity) -> String {
        match self.inner.gateway.list_titles(identity).await {
            Ok(titles) => unique_title(base, titles.iter().map(String::as_str)),
            Err(e) => {
                tracing::warn!(user_id = %identity, error = %e, "Listing project titles failed, using timestamp suffix");
                timestamp_title(base, &Local::now())
            }
        }
    }

    async fn save_logged(&self, identity: &Identity, after: &str) {
        if let Err(e) = self.save_project(identity).await {
            tracing::warn!(session_id = %self.id(), error = %e, "Save failed after {}", after);
        }
    }

    /// Settle one pipeline: drop the in-flight count and move to `step`
    pub(super) fn finish_pipeline(&self, generation: u64, step: ProcessingStep) {
        self.with_current(generation, |state| {
            state.status.pipeline_finished();
            self.set_step(state, step);
        });
    }
}
