use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::{
    AutoMergePolicy, ChangeRequest, MergeApprover, MergeDecision, MergeViolation, SemverClass,
};
use relay_state::Conclusion;

#[derive(Default)]
struct RecordingApprover {
    approved: Mutex<Vec<u64>>,
}

#[async_trait]
impl MergeApprover for RecordingApprover {
    async fn approve(&self, change_request_id: u64) -> relay_core::Result<()> {
        self.approved.lock().unwrap().push(change_request_id);
        Ok(())
    }
}

fn decision(actor_is_bot: bool, semver_class: SemverClass, ci: Conclusion) -> MergeDecision {
    MergeDecision {
        actor_is_bot,
        semver_class,
        ci_conclusion: ci,
    }
}

// ---- the eight combinations of (bot, bump within limit, CI success) ----

#[test]
fn all_eight_combinations() {
    let policy = AutoMergePolicy::default();
    for bot in [false, true] {
        for small in [false, true] {
            for green in [false, true] {
                let class = if small {
                    SemverClass::Minor
                } else {
                    SemverClass::Major
                };
                let ci = if green {
                    Conclusion::Success
                } else {
                    Conclusion::Failure
                };
                let verdict = policy.evaluate(&decision(bot, class, ci));
                assert_eq!(
                    verdict.approve,
                    bot && small && green,
                    "bot={bot} small={small} green={green}"
                );
                let expected_violations = [!bot, !small, !green].iter().filter(|v| **v).count();
                assert_eq!(verdict.violations.len(), expected_violations);
            }
        }
    }
}

#[test]
fn patch_and_minor_allowed_by_default() {
    let policy = AutoMergePolicy::default();
    assert!(policy.approves(&decision(true, SemverClass::Patch, Conclusion::Success)));
    assert!(policy.approves(&decision(true, SemverClass::Minor, Conclusion::Success)));
    assert!(!policy.approves(&decision(true, SemverClass::Major, Conclusion::Success)));
}

#[test]
fn patch_only_policy_rejects_minor() {
    let policy = AutoMergePolicy::new("renovate[bot]", SemverClass::Patch);
    let verdict = policy.evaluate(&decision(true, SemverClass::Minor, Conclusion::Success));
    assert_eq!(
        verdict.violations,
        vec![MergeViolation::BumpTooLarge {
            class: SemverClass::Minor,
            max: SemverClass::Patch,
        }]
    );
}

#[test]
fn cancelled_ci_is_not_success() {
    let policy = AutoMergePolicy::default();
    let verdict = policy.evaluate(&decision(true, SemverClass::Patch, Conclusion::Cancelled));
    assert_eq!(
        verdict.violations,
        vec![MergeViolation::CiNotSuccessful {
            conclusion: Conclusion::Cancelled
        }]
    );
}

#[test]
fn decide_matches_bot_login_exactly() {
    let policy = AutoMergePolicy::default();
    let mut request = ChangeRequest {
        id: 7,
        actor: "dependabot[bot]".to_string(),
        semver_class: SemverClass::Patch,
        ci_conclusion: Conclusion::Success,
    };
    assert!(policy.decide(&request).actor_is_bot);
    request.actor = "dependabot".to_string();
    assert!(!policy.decide(&request).actor_is_bot);
}

#[tokio::test]
async fn judge_calls_approver_only_when_approved() {
    let policy = AutoMergePolicy::default();
    let approver = RecordingApprover::default();

    let good = ChangeRequest {
        id: 41,
        actor: "dependabot[bot]".to_string(),
        semver_class: SemverClass::Minor,
        ci_conclusion: Conclusion::Success,
    };
    let bad = ChangeRequest {
        id: 42,
        semver_class: SemverClass::Major,
        ..good.clone()
    };

    assert!(policy.judge(&good, &approver).await.unwrap().approve);
    assert!(!policy.judge(&bad, &approver).await.unwrap().approve);
    assert_eq!(*approver.approved.lock().unwrap(), vec![41]);
}
