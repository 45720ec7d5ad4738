//! Downstream dispatch gate: fire the downstream packaging update once every
//! required OS family has concluded successfully for a release cycle.
//!
//! Family pipelines finish independently and in any order. Each conclusion
//! is recorded through [`GateStore::record`], which appends and evaluates
//! the conjunction in one critical section; only the caller that receives
//! `GateTransition::Fire` sends the event, so a cycle is dispatched at most
//! once by the automatic path no matter how notifications interleave.
//!
//! Dispatch failures are written back to the cycle record and returned to
//! the caller. Nothing retries them; an operator re-dispatches manually.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_state::{
    validate_key, Conclusion, CycleRecord, DispatchStatus, DispatchTrigger, GateStore,
    GateTransition, Observation,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::dispatch::DispatchEvent;
use crate::domain::error::{RelayError, Result};
use crate::domain::run::PipelineRunResult;
use crate::domain::target::OsFamily;
use crate::obs;

/// Sends a dispatch event to the downstream repository.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, event: &DispatchEvent) -> Result<()>;
}

/// Dispatcher that only logs; for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDispatcher;

#[async_trait]
impl Dispatcher for DryRunDispatcher {
    async fn dispatch(&self, event: &DispatchEvent) -> Result<()> {
        info!(
            repository = %event.target_repository,
            event_type = %event.event_type,
            payload = %event.client_payload,
            "dry run: dispatch not sent"
        );
        Ok(())
    }
}

/// What a notification did to its cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    Waiting { missing: Vec<String> },
    Blocked { failed: Vec<String> },
    AlreadyDispatched,
    Dispatched { event: DispatchEvent },
}

impl GateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            GateOutcome::Waiting { .. } => "waiting",
            GateOutcome::Blocked { .. } => "blocked",
            GateOutcome::AlreadyDispatched => "already_dispatched",
            GateOutcome::Dispatched { .. } => "dispatched",
        }
    }
}

pub struct DownstreamDispatchGate {
    store: Arc<dyn GateStore>,
    dispatcher: Arc<dyn Dispatcher>,
    required: BTreeSet<String>,
    repository: String,
    event_type: String,
}

impl DownstreamDispatchGate {
    /// `required` is fixed for the gate's lifetime. An empty set never fires
    /// automatically.
    pub fn new(
        store: Arc<dyn GateStore>,
        dispatcher: Arc<dyn Dispatcher>,
        required: impl IntoIterator<Item = OsFamily>,
        repository: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            required: required
                .into_iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            repository: repository.into(),
            event_type: event_type.into(),
        }
    }

    pub fn required_families(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Feed a finalized pipeline result into the gate.
    pub async fn on_run_concluded(&self, result: &PipelineRunResult) -> Result<GateOutcome> {
        self.notify(
            result.tag.display(),
            result.family,
            result.conclusion,
            Some(result.run_id.clone()),
            result.finished_at,
        )
        .await
    }

    /// Record one family conclusion for `cycle` and dispatch if it completes
    /// the conjunction.
    pub async fn notify(
        &self,
        cycle: &str,
        family: OsFamily,
        conclusion: Conclusion,
        run_id: Option<String>,
        concluded_at: DateTime<Utc>,
    ) -> Result<GateOutcome> {
        validate_key(cycle)?;
        let observation = Observation::new(conclusion, run_id, concluded_at);
        let transition = self
            .store
            .record(cycle, family.as_str(), observation, &self.required)
            .await?;

        let outcome = match transition {
            GateTransition::Fire => {
                let event = self.send(cycle, &DispatchTrigger::Automatic).await?;
                GateOutcome::Dispatched { event }
            }
            GateTransition::Waiting { missing } => GateOutcome::Waiting { missing },
            GateTransition::Blocked { failed } => GateOutcome::Blocked { failed },
            GateTransition::AlreadyDispatched => GateOutcome::AlreadyDispatched,
        };
        obs::emit_gate_recorded(cycle, family.as_str(), conclusion.as_str(), outcome.label());
        Ok(outcome)
    }

    /// Dispatch regardless of recorded conclusions. Marks the cycle
    /// dispatched so the automatic path stays quiet afterwards.
    pub async fn manual_dispatch(&self, cycle: &str, operator: &str) -> Result<DispatchEvent> {
        validate_key(cycle)?;
        if operator.trim().is_empty() {
            return Err(RelayError::Config(
                "manual dispatch requires an operator name".to_string(),
            ));
        }
        let record = self.store.claim_manual(cycle, operator).await?;
        let trigger = record
            .dispatch
            .map(|mark| mark.trigger)
            .unwrap_or(DispatchTrigger::Manual {
                operator: operator.to_string(),
            });
        self.send(cycle, &trigger).await
    }

    pub async fn status(&self, cycle: &str) -> Result<Option<CycleRecord>> {
        Ok(self.store.get(cycle).await?)
    }

    /// Undispatched cycles first seen at least `max_age` ago. Diagnostic
    /// only: nothing here fires or expires a cycle.
    pub async fn stale_cycles(&self, max_age: Duration) -> Result<Vec<CycleRecord>> {
        let now = Utc::now();
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .filter(|r| !r.is_dispatched() && now - r.first_seen >= max_age)
            .collect())
    }

    async fn send(&self, cycle: &str, trigger: &DispatchTrigger) -> Result<DispatchEvent> {
        let event = DispatchEvent::for_cycle(&self.repository, &self.event_type, cycle);
        match self.dispatcher.dispatch(&event).await {
            Ok(()) => {
                // the event is out; a lost status write must not report failure
                if let Err(err) = self
                    .store
                    .set_dispatch_status(cycle, DispatchStatus::Sent { at: Utc::now() })
                    .await
                {
                    warn!(cycle = %cycle, error = %err, "dispatch sent but status not recorded");
                }
                let trigger = match trigger {
                    DispatchTrigger::Automatic => "automatic".to_string(),
                    DispatchTrigger::Manual { operator } => format!("manual:{operator}"),
                };
                obs::emit_gate_fired(cycle, &trigger, &self.repository);
                Ok(event)
            }
            Err(err) => {
                obs::emit_gate_dispatch_failed(cycle, &err);
                self.store
                    .set_dispatch_status(
                        cycle,
                        DispatchStatus::Failed {
                            reason: err.to_string(),
                            at: Utc::now(),
                        },
                    )
                    .await?;
                Err(err)
            }
        }
    }
}
