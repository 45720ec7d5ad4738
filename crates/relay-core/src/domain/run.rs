//! Pipeline run lifecycle: states and the finalized result.

use std::fmt;

use chrono::{DateTime, Utc};
use relay_state::{Conclusion, RunRecord};
use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};
use crate::domain::tag::ReleaseTag;
use crate::domain::target::OsFamily;

/// State of one pipeline run.
///
/// `Pending -> TestGate -> Building -> Packaging -> Uploading -> Succeeded`,
/// with `Failed` and `Cancelled` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    TestGate,
    Building,
    Packaging,
    Uploading,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }

    /// The forward successor in the happy path.
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Pending => Some(RunState::TestGate),
            RunState::TestGate => Some(RunState::Building),
            RunState::Building => Some(RunState::Packaging),
            RunState::Packaging => Some(RunState::Uploading),
            RunState::Uploading => Some(RunState::Succeeded),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(to, RunState::Failed | RunState::Cancelled) || self.next() == Some(to)
    }

    /// Conclusion for a terminal state.
    pub fn conclusion(&self) -> Option<Conclusion> {
        match self {
            RunState::Succeeded => Some(Conclusion::Success),
            RunState::Failed => Some(Conclusion::Failure),
            RunState::Cancelled => Some(Conclusion::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::TestGate => "test_gate",
            RunState::Building => "building",
            RunState::Packaging => "packaging",
            RunState::Uploading => "uploading",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Finalized outcome of a pipeline run; the unit the dispatch gate consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRunResult {
    pub run_id: String,
    pub family: OsFamily,
    pub tag: ReleaseTag,
    pub conclusion: Conclusion,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineRunResult {
    /// Build from a finalized ledger record.
    pub fn from_record(record: &RunRecord) -> Result<Self> {
        let conclusion = record.conclusion.ok_or_else(|| {
            RelayError::Storage(relay_state::StorageError::Backend(format!(
                "run {} is not finalized",
                record.run_id
            )))
        })?;
        Ok(Self {
            run_id: record.run_id.0.clone(),
            family: record.metadata.family.parse()?,
            tag: ReleaseTag::parse_tag(&record.metadata.tag)?,
            conclusion,
            started_at: record.started_at,
            finished_at: record.finished_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_state::{RunId, RunMetadata};

    #[test]
    fn happy_path_transitions() {
        let mut state = RunState::Pending;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            seen.push(state);
        }
        assert_eq!(state, RunState::Succeeded);
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn no_skipping_phases() {
        assert!(!RunState::TestGate.can_transition_to(RunState::Packaging));
        assert!(!RunState::Building.can_transition_to(RunState::Uploading));
        assert!(!RunState::Pending.can_transition_to(RunState::Succeeded));
    }

    #[test]
    fn failure_reachable_from_any_live_state() {
        for s in [
            RunState::Pending,
            RunState::TestGate,
            RunState::Building,
            RunState::Packaging,
            RunState::Uploading,
        ] {
            assert!(s.can_transition_to(RunState::Failed));
            assert!(s.can_transition_to(RunState::Cancelled));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for s in [RunState::Succeeded, RunState::Failed, RunState::Cancelled] {
            assert!(s.is_terminal());
            assert!(!s.can_transition_to(RunState::Failed));
            assert!(s.conclusion().is_some());
        }
        assert!(RunState::Uploading.conclusion().is_none());
    }

    #[test]
    fn result_from_record() {
        let record = RunRecord {
            run_id: RunId("run-1".to_string()),
            metadata: RunMetadata {
                family: "macos".to_string(),
                tag: "v2.3.1".to_string(),
                commit_sha: None,
                targets: vec![],
            },
            conclusion: Some(Conclusion::Success),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };
        let result = PipelineRunResult::from_record(&record).unwrap();
        assert_eq!(result.family, OsFamily::Macos);
        assert_eq!(result.tag.display(), "v2.3.1");

        let mut open = record.clone();
        open.conclusion = None;
        assert!(PipelineRunResult::from_record(&open).is_err());
    }
}
