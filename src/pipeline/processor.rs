//! Delivery pipeline: parse, upsert and route one inbound email.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ParseFailure, PipelineError};
use crate::model::DeliveryEvent;
use crate::parser::{InboundEmail, ParserEngine};
use crate::registry::AdapterRegistries;
use crate::routing::{RouteReport, RoutingEngine};
use crate::store::{DeliveryStore, MergeWarning};

/// What happened to one inbound email.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestReport {
    /// Parsed, stored and routed.
    Routed {
        event: DeliveryEvent,
        was_new: bool,
        warnings: Vec<MergeWarning>,
        route: RouteReport,
    },
    /// No event could be built; nothing was stored.
    ParseFailed { failure: ParseFailure },
}

impl IngestReport {
    pub fn event(&self) -> Option<&DeliveryEvent> {
        match self {
            Self::Routed { event, .. } => Some(event),
            Self::ParseFailed { .. } => None,
        }
    }
}

/// Wires the parser engine, delivery store and routing engine together.
pub struct DeliveryPipeline {
    parser: ParserEngine,
    store: Arc<DeliveryStore>,
    router: Arc<RoutingEngine>,
}

impl DeliveryPipeline {
    pub fn new(
        registries: Arc<AdapterRegistries>,
        store: Arc<DeliveryStore>,
        router: Arc<RoutingEngine>,
    ) -> Self {
        Self {
            parser: ParserEngine::new(registries),
            store,
            router,
        }
    }

    pub fn parser(&self) -> &ParserEngine {
        &self.parser
    }

    pub fn store(&self) -> &Arc<DeliveryStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<RoutingEngine> {
        &self.router
    }

    /// Process one inbound email end to end.
    ///
    /// Parse failures are part of the report. Only an empty email or an
    /// unknown or disabled mail account is an error.
    pub async fn submit(
        &self,
        email: InboundEmail,
        parser_hint: Option<&str>,
    ) -> Result<IngestReport, PipelineError> {
        if email.raw.iter().all(u8::is_ascii_whitespace) {
            return Err(PipelineError::InvalidRequest("email is empty".into()));
        }

        let config = self.router.config().await;
        let account = config
            .mail_account(&email.mail_account)
            .ok_or_else(|| PipelineError::UnknownAccount(email.mail_account.clone()))?;
        if !account.enabled {
            return Err(PipelineError::AccountDisabled(account.id.clone()));
        }

        info!(
            mail_account = %email.mail_account,
            provider = %account.provider_key,
            bytes = email.raw.len(),
            "Processing inbound email"
        );

        let event = match self
            .parser
            .parse(&email, Some(&account.provider_key), parser_hint)
        {
            Ok(event) => event,
            Err(failure) => {
                info!(
                    mail_account = %email.mail_account,
                    reason = %failure.reason,
                    detail = %failure.detail,
                    "Email not parsed"
                );
                return Ok(IngestReport::ParseFailed { failure });
            }
        };

        let upsert = self.store.upsert(event).await;
        debug!(
            event_id = %upsert.event.id,
            was_new = upsert.was_new,
            warnings = upsert.warnings.len(),
            "Delivery upserted"
        );

        // Route the merged event, not the parsed one.
        let route = self.router.route(&upsert.event).await;
        if !route.unresolved.is_empty() {
            warn!(
                event_id = %upsert.event.id,
                unresolved = route.unresolved.len(),
                "Some routing targets could not be resolved"
            );
        }

        Ok(IngestReport::Routed {
            event: upsert.event,
            was_new: upsert.was_new,
            warnings: upsert.warnings,
            route,
        })
    }

    /// Process a batch of emails (e.g. one mailbox poll).
    ///
    /// Emails are processed in order. Account errors are logged and don't
    /// fail the batch.
    pub async fn submit_batch(&self, emails: Vec<InboundEmail>) -> Vec<IngestReport> {
        let count = emails.len();
        info!(count, "Processing email batch");

        let mut reports = Vec::with_capacity(count);
        for email in emails {
            let mail_account = email.mail_account.clone();
            match self.submit(email, None).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(
                        mail_account = %mail_account,
                        error = %e,
                        "Failed to process email in batch"
                    );
                }
            }
        }

        info!(processed = reports.len(), total = count, "Batch processing complete");
        reports
    }
}
