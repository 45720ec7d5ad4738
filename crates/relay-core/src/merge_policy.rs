//! Auto-merge policy for dependency-update change requests.
//!
//! Approve iff the actor is the configured bot, the bump is no larger than
//! the configured maximum, and CI concluded `Success`. Stateless.

use async_trait::async_trait;
use relay_state::Conclusion;
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::merge::{ChangeRequest, MergeDecision, SemverClass};
use crate::obs;

/// Default bot login whose change requests are eligible.
pub const DEFAULT_BOT_LOGIN: &str = "dependabot[bot]";

/// Approves a change request on the hosting platform.
#[async_trait]
pub trait MergeApprover: Send + Sync {
    async fn approve(&self, change_request_id: u64) -> Result<()>;
}

/// Approver that only logs; for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunApprover;

#[async_trait]
impl MergeApprover for DryRunApprover {
    async fn approve(&self, change_request_id: u64) -> Result<()> {
        tracing::info!(change_request = change_request_id, "dry run: merge not requested");
        Ok(())
    }
}

/// A violated merge condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MergeViolation {
    NotBot,
    BumpTooLarge { class: SemverClass, max: SemverClass },
    CiNotSuccessful { conclusion: Conclusion },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeVerdict {
    pub approve: bool,
    pub violations: Vec<MergeViolation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMergePolicy {
    pub bot_login: String,
    pub max_bump: SemverClass,
}

impl Default for AutoMergePolicy {
    fn default() -> Self {
        Self {
            bot_login: DEFAULT_BOT_LOGIN.to_string(),
            max_bump: SemverClass::Minor,
        }
    }
}

impl AutoMergePolicy {
    pub fn new(bot_login: impl Into<String>, max_bump: SemverClass) -> Self {
        Self {
            bot_login: bot_login.into(),
            max_bump,
        }
    }

    /// Derive the decision inputs from a change request.
    pub fn decide(&self, request: &ChangeRequest) -> MergeDecision {
        MergeDecision {
            actor_is_bot: request.actor == self.bot_login,
            semver_class: request.semver_class,
            ci_conclusion: request.ci_conclusion,
        }
    }

    pub fn evaluate(&self, decision: &MergeDecision) -> MergeVerdict {
        let mut violations = Vec::new();
        if !decision.actor_is_bot {
            violations.push(MergeViolation::NotBot);
        }
        if decision.semver_class > self.max_bump {
            violations.push(MergeViolation::BumpTooLarge {
                class: decision.semver_class,
                max: self.max_bump,
            });
        }
        if !decision.ci_conclusion.is_success() {
            violations.push(MergeViolation::CiNotSuccessful {
                conclusion: decision.ci_conclusion,
            });
        }
        MergeVerdict {
            approve: violations.is_empty(),
            violations,
        }
    }

    pub fn approves(&self, decision: &MergeDecision) -> bool {
        self.evaluate(decision).approve
    }

    /// Judge a change request and, when approved, hand it to `approver`.
    pub async fn judge(
        &self,
        request: &ChangeRequest,
        approver: &dyn MergeApprover,
    ) -> Result<MergeVerdict> {
        let verdict = self.evaluate(&self.decide(request));
        obs::emit_merge_evaluated(request.id, verdict.approve, verdict.violations.len());
        if verdict.approve {
            approver.approve(request.id).await?;
        }
        Ok(verdict)
    }
}
