//! Routing engine: matches events against routing rules and dispatches them
//! to target adapters with at-most-once delivery per (event, target).
//!
//! Flow per `route()` call:
//! 1. Snapshot the current `AppConfig`
//! 2. Collect targets of all enabled rules matching (mail account, carrier)
//! 3. Resolve each target to an adapter, reporting the ones that don't resolve
//! 4. Dispatch concurrently; each (event, target) outcome is locked for the
//!    duration of its own dispatch

pub mod adapter;
pub mod ledger;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, RetryPolicy, TargetConfig};
use crate::model::{DeliveryEvent, EventId, OutcomeState, RoutingOutcome};
use crate::registry::AdapterRegistries;

pub use adapter::{DeliveryResult, JournalEntry, JournalTarget, TargetAdapter, notification_text};
pub use ledger::OutcomeLedger;

/// Upper bound on a single adapter call.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a rule's target could not be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No target with this id in the config.
    UnknownTarget,
    TargetDisabled,
    /// The target's `target_key` has no registered adapter.
    NoAdapter,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownTarget => "unknown target",
            Self::TargetDisabled => "target disabled",
            Self::NoAdapter => "no adapter",
        };
        write!(f, "{s}")
    }
}

/// A rule target that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTargetUnresolved {
    pub rule_id: String,
    pub target_id: String,
    pub reason: UnresolvedReason,
}

/// Result of routing one event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteReport {
    /// Outcome per resolved target, after this call.
    pub outcomes: Vec<RoutingOutcome>,
    /// Target ids an adapter was actually called for during this call.
    pub dispatched: Vec<String>,
    pub unresolved: Vec<RoutingTargetUnresolved>,
}

/// A target resolved to its adapter.
struct ResolvedTarget {
    config: TargetConfig,
    adapter: Arc<dyn TargetAdapter>,
}

/// Dispatches delivery events to configured targets.
pub struct RoutingEngine {
    config: RwLock<Arc<AppConfig>>,
    registries: Arc<AdapterRegistries>,
    ledger: OutcomeLedger,
    retry: RetryPolicy,
    dispatch_timeout: Duration,
}

impl RoutingEngine {
    pub fn new(config: AppConfig, registries: Arc<AdapterRegistries>, retry: RetryPolicy) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            registries,
            ledger: OutcomeLedger::new(),
            retry,
            dispatch_timeout: DISPATCH_TIMEOUT,
        }
    }

    /// Override the per-dispatch timeout.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// The config routes currently run against.
    pub async fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// Swap in a new config. Routes already running keep their snapshot.
    pub async fn reload(&self, config: AppConfig) {
        info!(
            rules = config.routing_rules.len(),
            targets = config.targets.len(),
            "Routing config reloaded"
        );
        *self.config.write().await = Arc::new(config);
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn ledger(&self) -> &OutcomeLedger {
        &self.ledger
    }

    /// Outcomes recorded for one event, ordered by target id.
    pub async fn outcomes_for(&self, event_id: &EventId) -> Vec<RoutingOutcome> {
        self.ledger.outcomes_for(event_id).await
    }

    /// Route an event to every target its matching rules name.
    pub async fn route(&self, event: &DeliveryEvent) -> RouteReport {
        let config = self.config().await;
        let (targets, unresolved) = self.resolve_targets(&config, event);

        if targets.is_empty() && unresolved.is_empty() {
            debug!(event_id = %event.id, "No routing rule matches");
        }

        let results = join_all(
            targets
                .into_iter()
                .map(|target| self.route_to_target(event, target)),
        )
        .await;

        let mut report = RouteReport {
            unresolved,
            ..Default::default()
        };
        for (outcome, dispatched) in results {
            if dispatched {
                report.dispatched.push(outcome.target_id.clone());
            }
            report.outcomes.push(outcome);
        }
        report
    }

    /// Targets of all matching rules, deduplicated in first-seen order.
    fn resolve_targets(
        &self,
        config: &AppConfig,
        event: &DeliveryEvent,
    ) -> (Vec<ResolvedTarget>, Vec<RoutingTargetUnresolved>) {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();

        let rules = config.routing_rules.iter().filter(|rule| {
            rule.enabled
                && rule.mail_account_id == event.mail_account
                && rule.parser_key == event.carrier
        });

        for rule in rules {
            for target_id in &rule.target_ids {
                if !seen.insert(target_id.as_str()) {
                    continue;
                }

                let outcome = match config.target(target_id) {
                    None => Err(UnresolvedReason::UnknownTarget),
                    Some(target) if !target.enabled => Err(UnresolvedReason::TargetDisabled),
                    Some(target) => match self.registries.targets.resolve(&target.target_key) {
                        Ok(capability) => Ok(ResolvedTarget {
                            config: target.clone(),
                            adapter: Arc::clone(&capability.adapter),
                        }),
                        Err(_) => Err(UnresolvedReason::NoAdapter),
                    },
                };

                match outcome {
                    Ok(target) => resolved.push(target),
                    Err(reason) => {
                        warn!(
                            event_id = %event.id,
                            rule_id = %rule.id,
                            target_id = %target_id,
                            %reason,
                            "Routing target unresolved"
                        );
                        unresolved.push(RoutingTargetUnresolved {
                            rule_id: rule.id.clone(),
                            target_id: target_id.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        (resolved, unresolved)
    }

    /// Dispatch to one target if its outcome calls for it.
    ///
    /// Returns the outcome after this call and whether the adapter was called.
    async fn route_to_target(
        &self,
        event: &DeliveryEvent,
        target: ResolvedTarget,
    ) -> (RoutingOutcome, bool) {
        let slot = self.ledger.slot(&event.id, &target.config.id).await;
        let mut outcome = slot.lock().await;
        let fingerprint = event.fingerprint();

        if outcome.state == OutcomeState::Delivered {
            if outcome.is_delivered_for(&fingerprint) {
                debug!(
                    event_id = %event.id,
                    target_id = %target.config.id,
                    "Already delivered, skipping"
                );
                return (outcome.clone(), false);
            }
            if outcome.is_behind(&fingerprint) {
                debug!(
                    event_id = %event.id,
                    target_id = %target.config.id,
                    status = %event.status,
                    "Older copy than the delivered one, skipping"
                );
                return (outcome.clone(), false);
            }
            info!(
                event_id = %event.id,
                target_id = %target.config.id,
                status = %event.status,
                "Material change, re-delivering"
            );
            transition(&mut outcome, OutcomeState::Pending);
            outcome.attempt_count = 0;
            outcome.last_error = None;
        }

        if !outcome.state.wants_dispatch() {
            debug!(
                event_id = %event.id,
                target_id = %target.config.id,
                state = %outcome.state,
                "Target failed permanently, skipping"
            );
            return (outcome.clone(), false);
        }

        outcome.attempt_count += 1;
        outcome.last_attempt_at = Some(Utc::now());

        let result = tokio::time::timeout(
            self.dispatch_timeout,
            target.adapter.deliver(event, &target.config),
        )
        .await
        .unwrap_or_else(|_| {
            DeliveryResult::Retryable(format!(
                "dispatch timed out after {:?}",
                self.dispatch_timeout
            ))
        });

        match result {
            DeliveryResult::Delivered => {
                transition(&mut outcome, OutcomeState::Delivered);
                outcome.delivered_fingerprint = Some(fingerprint);
                outcome.last_error = None;
                info!(
                    event_id = %event.id,
                    target_id = %target.config.id,
                    attempt = outcome.attempt_count,
                    "Delivered to target"
                );
            }
            DeliveryResult::Retryable(reason) => {
                let next = if outcome.attempt_count >= self.retry.max_attempts {
                    OutcomeState::FailedPermanent
                } else {
                    OutcomeState::FailedRetryable
                };
                transition(&mut outcome, next);
                warn!(
                    event_id = %event.id,
                    target_id = %target.config.id,
                    attempt = outcome.attempt_count,
                    state = %next,
                    error = %reason,
                    "Delivery failed"
                );
                outcome.last_error = Some(reason);
            }
            DeliveryResult::Permanent(reason) => {
                transition(&mut outcome, OutcomeState::FailedPermanent);
                warn!(
                    event_id = %event.id,
                    target_id = %target.config.id,
                    error = %reason,
                    "Delivery rejected permanently"
                );
                outcome.last_error = Some(reason);
            }
        }

        (outcome.clone(), true)
    }
}

fn transition(outcome: &mut RoutingOutcome, state: OutcomeState) {
    if let Err(e) = outcome.transition_to(state) {
        error!(error = %e, "Invalid outcome transition");
    }
}
