//! Per-cycle gate record and the conjunction rule evaluated against it.
//!
//! A cycle collects every conclusion reported for every OS family. The rule:
//! - a recorded `Failure` for any family blocks the automatic path for good;
//! - `Cancelled` is kept for the audit trail but neither satisfies nor blocks;
//! - the cycle fires once every required family's latest conclusion is
//!   `Success`, and is then marked dispatched so later reports are ignored.
//!
//! Stores call [`CycleRecord::observe`] inside their critical section.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::Conclusion;

/// One reported conclusion for a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub conclusion: Conclusion,
    /// Run that produced the conclusion, if the reporter knows it.
    pub run_id: Option<String>,
    /// When the run concluded (reporter's clock).
    pub concluded_at: DateTime<Utc>,
    /// When the gate recorded it.
    pub recorded_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(conclusion: Conclusion, run_id: Option<String>, concluded_at: DateTime<Utc>) -> Self {
        Self {
            conclusion,
            run_id,
            concluded_at,
            recorded_at: Utc::now(),
        }
    }
}

/// Who claimed the dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchTrigger {
    Automatic,
    Manual { operator: String },
}

/// Outcome of the outbound dispatch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Sent { at: DateTime<Utc> },
    Failed { reason: String, at: DateTime<Utc> },
}

/// Dispatch marker set when a cycle fires or is manually dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMark {
    pub trigger: DispatchTrigger,
    pub marked_at: DateTime<Utc>,
    pub status: DispatchStatus,
}

/// Result of recording one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum GateTransition {
    /// This observation completed the conjunction; the caller owns the dispatch.
    Fire,
    /// Still waiting on these required families.
    Waiting { missing: Vec<String> },
    /// A family reported failure; the automatic path will not fire.
    Blocked { failed: Vec<String> },
    /// The cycle was already dispatched; observation recorded only.
    AlreadyDispatched,
}

/// Gate state for one release cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: String,
    /// Family -> observations in arrival order.
    pub observations: BTreeMap<String, Vec<Observation>>,
    pub dispatch: Option<DispatchMark>,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CycleRecord {
    pub fn new(cycle: &str, now: DateTime<Utc>) -> Self {
        Self {
            cycle: cycle.to_string(),
            observations: BTreeMap::new(),
            dispatch: None,
            first_seen: now,
            updated_at: now,
        }
    }

    /// Latest conclusion reported for a family.
    pub fn latest(&self, family: &str) -> Option<Conclusion> {
        self.observations
            .get(family)
            .and_then(|obs| obs.last())
            .map(|o| o.conclusion)
    }

    /// Required families with at least one recorded failure. Failures of
    /// other families are kept in the record but never block.
    pub fn failed_families(&self, required: &BTreeSet<String>) -> Vec<String> {
        self.observations
            .iter()
            .filter(|(family, _)| required.contains(*family))
            .filter(|(_, obs)| obs.iter().any(|o| o.conclusion == Conclusion::Failure))
            .map(|(family, _)| family.clone())
            .collect()
    }

    /// Required families whose latest conclusion is not `Success`.
    pub fn missing(&self, required: &BTreeSet<String>) -> Vec<String> {
        required
            .iter()
            .filter(|family| self.latest(family) != Some(Conclusion::Success))
            .cloned()
            .collect()
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatch.is_some()
    }

    /// Append an observation and evaluate the conjunction.
    ///
    /// Returns `Fire` at most once over the lifetime of the record.
    pub fn observe(
        &mut self,
        family: &str,
        observation: Observation,
        required: &BTreeSet<String>,
    ) -> GateTransition {
        let now = observation.recorded_at;
        let conclusion = observation.conclusion;
        self.observations
            .entry(family.to_string())
            .or_default()
            .push(observation);
        self.updated_at = now;

        if self.is_dispatched() {
            return GateTransition::AlreadyDispatched;
        }

        let failed = self.failed_families(required);
        if !failed.is_empty() {
            return GateTransition::Blocked { failed };
        }

        let missing = self.missing(required);
        if conclusion.is_success() && missing.is_empty() && !required.is_empty() {
            self.dispatch = Some(DispatchMark {
                trigger: DispatchTrigger::Automatic,
                marked_at: now,
                status: DispatchStatus::Pending,
            });
            return GateTransition::Fire;
        }

        GateTransition::Waiting { missing }
    }

    /// Mark the cycle as dispatched by an operator.
    ///
    /// Overwrites any previous mark so a failed dispatch can be redone.
    pub fn claim_manual(&mut self, operator: &str, now: DateTime<Utc>) {
        self.dispatch = Some(DispatchMark {
            trigger: DispatchTrigger::Manual {
                operator: operator.to_string(),
            },
            marked_at: now,
            status: DispatchStatus::Pending,
        });
        self.updated_at = now;
    }

    /// Update the status of an existing dispatch mark.
    pub fn set_status(&mut self, status: DispatchStatus, now: DateTime<Utc>) -> bool {
        match self.dispatch.as_mut() {
            Some(mark) => {
                mark.status = status;
                self.updated_at = now;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(families: &[&str]) -> BTreeSet<String> {
        families.iter().map(|f| f.to_string()).collect()
    }

    fn obs(conclusion: Conclusion) -> Observation {
        Observation::new(conclusion, None, Utc::now())
    }

    #[test]
    fn fires_only_after_all_required_succeed() {
        let req = required(&["linux", "macos"]);
        let mut rec = CycleRecord::new("v2.3.1", Utc::now());

        let first = rec.observe("linux", obs(Conclusion::Success), &req);
        assert_eq!(
            first,
            GateTransition::Waiting {
                missing: vec!["macos".to_string()]
            }
        );
        assert!(!rec.is_dispatched());

        let second = rec.observe("macos", obs(Conclusion::Success), &req);
        assert_eq!(second, GateTransition::Fire);
        assert!(rec.is_dispatched());
    }

    #[test]
    fn duplicate_success_after_fire_is_ignored() {
        let req = required(&["linux"]);
        let mut rec = CycleRecord::new("v1.0.0", Utc::now());
        assert_eq!(rec.observe("linux", obs(Conclusion::Success), &req), GateTransition::Fire);
        assert_eq!(
            rec.observe("linux", obs(Conclusion::Success), &req),
            GateTransition::AlreadyDispatched
        );
        assert_eq!(rec.observations["linux"].len(), 2);
    }

    #[test]
    fn failure_blocks_regardless_of_order() {
        let req = required(&["linux", "macos"]);

        let mut a = CycleRecord::new("v1", Utc::now());
        a.observe("linux", obs(Conclusion::Failure), &req);
        let t = a.observe("macos", obs(Conclusion::Success), &req);
        assert_eq!(
            t,
            GateTransition::Blocked {
                failed: vec!["linux".to_string()]
            }
        );

        let mut b = CycleRecord::new("v1", Utc::now());
        b.observe("macos", obs(Conclusion::Success), &req);
        let t = b.observe("linux", obs(Conclusion::Failure), &req);
        assert!(matches!(t, GateTransition::Blocked { .. }));
        assert!(!a.is_dispatched());
        assert!(!b.is_dispatched());
    }

    #[test]
    fn failure_is_sticky_across_retries() {
        let req = required(&["linux", "macos"]);
        let mut rec = CycleRecord::new("v1", Utc::now());
        rec.observe("linux", obs(Conclusion::Failure), &req);
        rec.observe("linux", obs(Conclusion::Success), &req);
        let t = rec.observe("macos", obs(Conclusion::Success), &req);
        assert!(matches!(t, GateTransition::Blocked { .. }));
    }

    #[test]
    fn cancelled_neither_satisfies_nor_blocks() {
        let req = required(&["linux", "macos"]);
        let mut rec = CycleRecord::new("v1", Utc::now());
        rec.observe("linux", obs(Conclusion::Success), &req);
        let t = rec.observe("macos", obs(Conclusion::Cancelled), &req);
        assert_eq!(
            t,
            GateTransition::Waiting {
                missing: vec!["macos".to_string()]
            }
        );

        let t = rec.observe("macos", obs(Conclusion::Success), &req);
        assert_eq!(t, GateTransition::Fire);
    }

    #[test]
    fn unrequired_family_does_not_complete_conjunction() {
        let req = required(&["linux", "macos"]);
        let mut rec = CycleRecord::new("v1", Utc::now());
        rec.observe("linux", obs(Conclusion::Success), &req);
        let t = rec.observe("windows", obs(Conclusion::Success), &req);
        assert_eq!(
            t,
            GateTransition::Waiting {
                missing: vec!["macos".to_string()]
            }
        );
    }

    #[test]
    fn unrequired_failure_does_not_block() {
        let req = required(&["linux", "macos"]);
        let mut rec = CycleRecord::new("v1", Utc::now());
        let t = rec.observe("windows", obs(Conclusion::Failure), &req);
        assert_eq!(
            t,
            GateTransition::Waiting {
                missing: vec!["linux".to_string(), "macos".to_string()]
            }
        );
        rec.observe("linux", obs(Conclusion::Success), &req);
        assert_eq!(rec.observe("macos", obs(Conclusion::Success), &req), GateTransition::Fire);
        assert!(rec.failed_families(&req).is_empty());
        assert_eq!(rec.observations["windows"].len(), 1);
    }

    #[test]
    fn empty_required_set_never_fires() {
        let req = BTreeSet::new();
        let mut rec = CycleRecord::new("v1", Utc::now());
        let t = rec.observe("linux", obs(Conclusion::Success), &req);
        assert_eq!(t, GateTransition::Waiting { missing: vec![] });
    }

    #[test]
    fn manual_claim_blocks_later_automatic_fire() {
        let req = required(&["linux"]);
        let mut rec = CycleRecord::new("v1", Utc::now());
        rec.claim_manual("ops", Utc::now());
        assert_eq!(
            rec.observe("linux", obs(Conclusion::Success), &req),
            GateTransition::AlreadyDispatched
        );
        assert!(matches!(
            rec.dispatch.as_ref().unwrap().trigger,
            DispatchTrigger::Manual { .. }
        ));
    }

    #[test]
    fn set_status_requires_mark() {
        let mut rec = CycleRecord::new("v1", Utc::now());
        assert!(!rec.set_status(DispatchStatus::Sent { at: Utc::now() }, Utc::now()));
        rec.claim_manual("ops", Utc::now());
        assert!(rec.set_status(DispatchStatus::Sent { at: Utc::now() }, Utc::now()));
    }
}
